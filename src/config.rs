//! Consumed configuration: format templates, named presets, and the
//! resolution step that turns user input into a ready-to-run format.

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datetime::{is_epoch_format, TimeZone};
use crate::error::ConfigError;
use crate::json::is_json_template;
use crate::util::unescape;

/// Named log-format presets covering well-known access-log flavors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormatPreset {
    /// NCSA combined.
    Combined,
    /// NCSA combined with virtual host.
    VCombined,
    /// Common Log Format.
    Common,
    /// CLF with virtual host.
    VCommon,
    /// W3C extended (IIS).
    W3c,
    /// Amazon CloudFront download distribution.
    CloudFront,
    /// Google Cloud Storage usage logs.
    CloudStorage,
    /// AWS Elastic Load Balancing (classic).
    AwsElb,
    /// Squid native format.
    Squid,
    /// Amazon S3 server access logs.
    AwsS3,
    /// Caddy structured (JSON) access logs.
    Caddy,
    /// AWS Application Load Balancer.
    AwsAlb,
    /// Traefik's CLF flavor with an extra header field.
    TraefikClf,
}

impl LogFormatPreset {
    const ALL: &'static [(&'static str, LogFormatPreset)] = &[
        ("COMBINED", Self::Combined),
        ("VCOMBINED", Self::VCombined),
        ("COMMON", Self::Common),
        ("VCOMMON", Self::VCommon),
        ("W3C", Self::W3c),
        ("CLOUDFRONT", Self::CloudFront),
        ("CLOUDSTORAGE", Self::CloudStorage),
        ("AWSELB", Self::AwsElb),
        ("SQUID", Self::Squid),
        ("AWSS3", Self::AwsS3),
        ("CADDY", Self::Caddy),
        ("AWSALB", Self::AwsAlb),
        ("TRAEFIKCLF", Self::TraefikClf),
    ];

    /// Look a preset up by its configuration name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(candidate, _)| name.eq_ignore_ascii_case(candidate))
            .map(|&(_, preset)| preset)
    }

    /// The canonical template string this preset expands to.
    pub const fn template(self) -> &'static str {
        match self {
            Self::Combined => "%h %^[%d:%t %^] \"%r\" %s %b \"%R\" \"%u\"",
            Self::VCombined => "%v:%^ %h %^[%d:%t %^] \"%r\" %s %b \"%R\" \"%u\"",
            Self::Common => "%h %^[%d:%t %^] \"%r\" %s %b",
            Self::VCommon => "%v:%^ %h %^[%d:%t %^] \"%r\" %s %b",
            Self::W3c => "%d %t %^ %m %U %q %^ %^ %h %u %R %s %^ %^ %L",
            Self::CloudFront => {
                "%d\\t%t\\t%^\\t%b\\t%h\\t%m\\t%v\\t%U\\t%s\\t%R\\t%u\\t%q\\t%^\\t%C\\t%^\\t%^\\t%^\\t%^\\t%T\\t%^\\t%K\\t%k\\t%^\\t%H\\t%^"
            }
            Self::CloudStorage => {
                "\"%x\",\"%h\",%^,%^,\"%m\",\"%U\",\"%s\",%^,\"%b\",\"%D\",%^,\"%R\",\"%u\""
            }
            Self::AwsElb => {
                "%^ %dT%t.%^ %^ %h:%^ %^ %^ %T %^ %s %^ %^ %b \"%r\" \"%u\" %k %K %^ \"%^\" \"%v\""
            }
            Self::Squid => "%^ %^ %^ %v %^: %x.%^ %~%L %h %^/%s %b %m %U",
            Self::AwsS3 => {
                "%^ %v [%d:%t %^] %h %^\"%r\" %s %^ %b %^ %L %^ \"%R\" \"%u\""
            }
            Self::Caddy => {
                "{ \"ts\": \"%x.%^\", \"request\": { \"client_ip\": \"%h\", \"proto\":\"%H\", \"method\": \"%m\", \"host\": \"%v\", \"uri\": \"%U\", \"headers\": {\"User-Agent\": [\"%u\"], \"Referer\": [\"%R\"] }, \"tls\": { \"cipher_suite\":\"%k\", \"proto\": \"%K\" } }, \"duration\": \"%T\", \"size\": \"%b\",\"status\": \"%s\", \"resp_headers\": { \"Content-Type\": [\"%M\"] } }"
            }
            Self::AwsAlb => {
                "%^ %dT%t.%^ %v %h:%^ %^ %^ %T %^ %s %^ %^ %b \"%r\" \"%u\" %k %K %^"
            }
            Self::TraefikClf => {
                "%h - %e [%d:%t %^] \"%r\" %s %b \"%R\" \"%u\" %^ \"%v\" \"%U\" %Lms"
            }
        }
    }

    /// The date format this preset implies.
    pub const fn date_format(self) -> &'static str {
        match self {
            Self::Combined
            | Self::VCombined
            | Self::Common
            | Self::VCommon
            | Self::AwsS3
            | Self::TraefikClf => "%d/%b/%Y",
            Self::W3c | Self::CloudFront | Self::AwsElb | Self::AwsAlb => "%Y-%m-%d",
            Self::CloudStorage => "%f",
            Self::Squid | Self::Caddy => "%s",
        }
    }

    /// The time format this preset implies.
    pub const fn time_format(self) -> &'static str {
        match self {
            Self::CloudStorage => "%f",
            Self::Squid | Self::Caddy => "%s",
            _ => "%H:%M:%S",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Options controlling how lines are parsed.
///
/// `log_format` takes a template string, a structured-document template, or
/// a preset name; the other formats fall back to the preset's defaults when
/// left empty.
#[derive(Clone, Debug, Derivative, Deserialize, Serialize)]
#[derivative(Default)]
pub struct ParserConfig {
    /// Template string or preset name.
    pub log_format: String,

    /// `strftime`-style date format, or an epoch marker (`%s` seconds,
    /// `%*` milliseconds, `%f` microseconds).
    #[serde(default)]
    pub date_format: String,

    /// `strftime`-style time format, or an epoch marker.
    #[serde(default)]
    pub time_format: String,

    /// Zone the parsed dates and times are rendered in.
    #[serde(default)]
    pub timezone: TimeZone,

    /// Apply URL-decoding twice to decoded fields.
    #[serde(default)]
    pub double_decode: bool,

    /// Store the method split out of `%r` request lines.
    #[serde(default = "default_true")]
    #[derivative(Default(value = "true"))]
    pub append_method: bool,

    /// Store the protocol split out of `%r` request lines.
    #[serde(default = "default_true")]
    #[derivative(Default(value = "true"))]
    pub append_protocol: bool,

    /// Accept any status code in 0..=599 instead of requiring a registered
    /// code.
    #[serde(default)]
    pub no_strict_status: bool,

    /// Accept hosts that are not textual IP addresses (e.g. reverse-DNS
    /// names).
    #[serde(default)]
    pub no_ip_validation: bool,
}

impl ParserConfig {
    /// Configuration for a template or preset name with default options.
    pub fn new(log_format: impl Into<String>) -> Self {
        Self {
            log_format: log_format.into(),
            ..Self::default()
        }
    }
}

/// The outcome of resolving a [`ParserConfig`]: unescaped template, final
/// date/time formats, and the properties derived from them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ResolvedFormat {
    pub log_format: String,
    pub date_format: String,
    pub time_format: String,
    /// Date rendering format normalized to sortable numeric form, derived
    /// from the specifiers the date format carries.
    pub date_num_format: String,
    pub is_json: bool,
    pub expects_bandwidth: bool,
    pub expects_serve_time: bool,
}

impl ParserConfig {
    pub(crate) fn resolve(&self) -> Result<ResolvedFormat, ConfigError> {
        let preset = LogFormatPreset::from_name(&self.log_format);
        if let Some(preset) = preset {
            debug!(message = "Expanding log format preset.", preset = ?preset);
        }

        let (raw_log, date_format, time_format) = match preset {
            Some(preset) => (
                preset.template().to_owned(),
                if self.date_format.is_empty() {
                    preset.date_format().to_owned()
                } else {
                    unescape(&self.date_format)
                },
                if self.time_format.is_empty() {
                    preset.time_format().to_owned()
                } else {
                    unescape(&self.time_format)
                },
            ),
            None => (
                self.log_format.clone(),
                unescape(&self.date_format),
                unescape(&self.time_format),
            ),
        };

        if time_format.is_empty() {
            return Err(ConfigError::MissingTimeFormat);
        }
        if date_format.is_empty() {
            return Err(ConfigError::MissingDateFormat);
        }
        if raw_log.is_empty() {
            return Err(ConfigError::MissingLogFormat);
        }

        let is_json = is_json_template(&raw_log);
        let log_format = unescape(&raw_log);
        let date_num_format = derive_date_num_format(&date_format);

        Ok(ResolvedFormat {
            expects_bandwidth: log_format.contains("%b"),
            expects_serve_time: ["%D", "%T", "%L"]
                .iter()
                .any(|spec| log_format.contains(spec)),
            log_format,
            date_format,
            time_format,
            date_num_format,
            is_json,
        })
    }
}

/// Strip a date/time format down to its specifier characters, e.g.
/// `%d/%b/%Y` becomes `%d%b%Y`.
fn clean_datetime_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let mut special = false;
    for c in format.chars() {
        if c == '%' || special {
            special = !special;
            out.push(c);
        }
    }
    out
}

/// Normalize the user's date format to a sortable numeric form: always a
/// year, plus month and day when the format carries them. Abbreviated
/// formats (`%c`, `%D`, `%F`) always get the full form.
fn derive_date_num_format(date_format: &str) -> String {
    let cleaned = if is_epoch_format(date_format) {
        "%Y%m%d".to_owned()
    } else {
        clean_datetime_format(date_format)
    };

    if cleaned.contains(['c', 'D', 'F']) {
        return "%Y%m%d".to_owned();
    }

    let mut out = String::from("%Y");
    if cleaned.contains(['h', 'b', 'm', 'B', 'f', '*']) {
        out.push_str("%m");
    }
    if cleaned.contains(['d', 'e', 'f', '*']) {
        out.push_str("%d");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup_is_case_insensitive() {
        assert_eq!(
            LogFormatPreset::from_name("combined"),
            Some(LogFormatPreset::Combined)
        );
        assert_eq!(
            LogFormatPreset::from_name("CADDY"),
            Some(LogFormatPreset::Caddy)
        );
        assert_eq!(LogFormatPreset::from_name("NGINX"), None);
    }

    #[test]
    fn combined_resolves_with_defaults() {
        let resolved = ParserConfig::new("COMBINED").resolve().unwrap();
        assert_eq!(
            resolved.log_format,
            "%h %^[%d:%t %^] \"%r\" %s %b \"%R\" \"%u\""
        );
        assert_eq!(resolved.date_format, "%d/%b/%Y");
        assert_eq!(resolved.time_format, "%H:%M:%S");
        assert_eq!(resolved.date_num_format, "%Y%m%d");
        assert!(!resolved.is_json);
        assert!(resolved.expects_bandwidth);
        assert!(!resolved.expects_serve_time);
    }

    #[test]
    fn cloudfront_template_unescapes_tabs() {
        let resolved = ParserConfig::new("CLOUDFRONT").resolve().unwrap();
        assert!(resolved.log_format.contains("%d\t%t\t"));
        assert!(!resolved.log_format.contains("\\t"));
        assert!(resolved.expects_serve_time);
    }

    #[test]
    fn caddy_is_detected_as_json() {
        let resolved = ParserConfig::new("CADDY").resolve().unwrap();
        assert!(resolved.is_json);
        assert_eq!(resolved.date_format, "%s");
        assert_eq!(resolved.time_format, "%s");
    }

    #[test]
    fn user_formats_override_preset_defaults() {
        let mut config = ParserConfig::new("COMBINED");
        config.date_format = "%Y-%m-%d".to_owned();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.date_format, "%Y-%m-%d");
        assert_eq!(resolved.time_format, "%H:%M:%S");
    }

    #[test]
    fn custom_formats_require_date_and_time() {
        let config = ParserConfig::new("%h %U");
        assert_eq!(config.resolve(), Err(ConfigError::MissingTimeFormat));

        let mut config = ParserConfig::new("%h %U");
        config.time_format = "%H:%M:%S".to_owned();
        assert_eq!(config.resolve(), Err(ConfigError::MissingDateFormat));
    }

    #[test]
    fn empty_log_format_is_rejected() {
        let mut config = ParserConfig::new("");
        config.date_format = "%d/%b/%Y".to_owned();
        config.time_format = "%H:%M:%S".to_owned();
        assert_eq!(config.resolve(), Err(ConfigError::MissingLogFormat));
    }

    #[test]
    fn date_num_format_derivation() {
        assert_eq!(derive_date_num_format("%d/%b/%Y"), "%Y%m%d");
        assert_eq!(derive_date_num_format("%Y-%m-%d"), "%Y%m%d");
        assert_eq!(derive_date_num_format("%m/%Y"), "%Y%m");
        assert_eq!(derive_date_num_format("%Y"), "%Y");
        assert_eq!(derive_date_num_format("%s"), "%Y%m%d");
        assert_eq!(derive_date_num_format("%f"), "%Y%m%d");
        assert_eq!(derive_date_num_format("%*"), "%Y%m%d");
        assert_eq!(derive_date_num_format("%F"), "%Y%m%d");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ParserConfig =
            serde_json::from_str(r#"{ "log_format": "COMBINED" }"#).unwrap();
        assert!(config.append_method);
        assert!(config.append_protocol);
        assert!(!config.double_decode);
        assert_eq!(config.timezone, TimeZone::Utc);
    }

    #[test]
    fn config_deserializes_timezone() {
        let config: ParserConfig = serde_json::from_str(
            r#"{ "log_format": "COMBINED", "timezone": "Europe/Berlin" }"#,
        )
        .unwrap();
        assert!(matches!(config.timezone, TimeZone::Named(_)));

        let bad: Result<ParserConfig, _> = serde_json::from_str(
            r#"{ "log_format": "COMBINED", "timezone": "Mars/Olympus" }"#,
        );
        assert!(bad.is_err());
    }
}
