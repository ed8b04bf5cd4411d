use snafu::Snafu;

/// An error that occurs while resolving the user's format configuration.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum ConfigError {
    /// The time format is missing and no preset supplies one.
    #[snafu(display("No time format was found on your conf file."))]
    MissingTimeFormat,

    /// The date format is missing and no preset supplies one.
    #[snafu(display("No date format was found on your conf file."))]
    MissingDateFormat,

    /// The log format is empty.
    #[snafu(display("No log format was found on your conf file."))]
    MissingLogFormat,

    /// A structured-document template could not be traversed.
    #[snafu(display("Invalid JSON log format. Verify the syntax."))]
    InvalidJsonTemplate,
}

/// An error that occurs while parsing a single log line.
///
/// The `Display` output is what downstream consumers retain and show for
/// invalid lines, so the messages carry the offending specifier and token.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum ParseError {
    /// A specifier found no token before the expected delimiter.
    #[snafu(display("Token for '%{spec}' specifier is NULL."))]
    TokenEmpty {
        /// The specifier letter that failed to extract a token.
        spec: char,
    },

    /// A token was extracted but failed its validator.
    #[snafu(display("Token '{token}' doesn't match specifier '%{spec}'"))]
    TokenInvalid {
        /// The specifier letter whose validator rejected the token.
        spec: char,
        /// The rejected token.
        token: String,
    },

    /// A special specifier required a reject-set (braces) that was absent.
    #[snafu(display("Missing braces '{{}}' and ignore chars for specifier '%{spec}'"))]
    BracesMissing {
        /// The specifier letter that required braces.
        spec: char,
    },

    /// The input ran out while the template still expected content.
    #[snafu(display("Incompatible format due to early parsed line ending '\\0'."))]
    LineIncompatible,

    /// No client host was produced by the template.
    #[snafu(display("IPv4/6 is required."))]
    MissingHost,

    /// No date was produced by the template.
    #[snafu(display("A valid date is required."))]
    MissingDate,

    /// No request was produced by the template.
    #[snafu(display("A request is required."))]
    MissingRequest,

    /// A document-mode line was not a well-formed document.
    #[snafu(display("Malformed JSON line: {message}"))]
    MalformedDocument {
        /// The document parser's diagnostic.
        message: String,
    },
}
