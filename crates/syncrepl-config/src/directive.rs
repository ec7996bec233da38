//! Replica directive grammar (spec §6): one line of `key=value` pairs,
//! `rid`/`provider`/`searchbase` required, duplicate keys on one line
//! rejected. Values containing whitespace (most often `filter`) are
//! wrapped in double quotes.

use std::collections::HashMap;
use std::time::Duration;

use syncrepl_modbuilder::SuffixRewrite;
use syncrepl_types::{parse_retry_directive, DataMode, ProtocolType, RetrySchedule, Scope, SearchParams};

use crate::error::ConfigError;

/// One parsed replica directive line.
#[derive(Debug, Clone)]
pub struct ReplicaDirective {
    pub rid: u16,
    pub provider: String,
    pub search: SearchParams,
    pub suffix_rewrite: Option<SuffixRewrite>,
    pub protocol: ProtocolType,
    pub syncdata: DataMode,
    pub interval: Duration,
    pub retry: RetrySchedule,
    pub schemachecking: bool,
    pub log_base: Option<String>,
    pub log_filter: Option<String>,
    pub managedsait: bool,
    pub strictrefresh: bool,
    pub lazycommit: bool,
    /// Bind/TLS/auth options and anything else not named in spec §6's
    /// table: passed through to the transport untouched (spec: "(bind/TLS/
    /// auth options) passed to the transport").
    pub passthrough: HashMap<String, String>,
}

/// Splits one directive line into `key=value` tokens, tolerating a leading
/// bare `syncrepl` keyword and double-quoted values containing whitespace.
/// Rejects duplicate keys.
fn tokenize(line: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut tokens = Vec::new();
    let bytes = line.as_bytes();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            break;
        }
        let start = cursor;
        // scan to next unquoted whitespace
        let mut in_quotes = false;
        while cursor < bytes.len() {
            match bytes[cursor] {
                b'"' => in_quotes = !in_quotes,
                b' ' | b'\t' if !in_quotes => break,
                _ => {}
            }
            cursor += 1;
        }
        if in_quotes {
            return Err(ConfigError::UnterminatedQuote(line[start..cursor].to_string()));
        }
        let token = &line[start..cursor];
        if let Some((key, value)) = token.split_once('=') {
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
            tokens.push((key.to_ascii_lowercase(), value.to_string()));
        } else if !token.eq_ignore_ascii_case("syncrepl") {
            return Err(ConfigError::MalformedToken(token.to_string()));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for (key, _) in &tokens {
        if !seen.insert(key.clone()) {
            return Err(ConfigError::DuplicateKey(key.clone()));
        }
    }
    Ok(tokens)
}

/// Accepts plain seconds (`"60"`) or `d:h:m:s` (`"0:0:1:0"`).
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 4 {
        return Err(ConfigError::BadValue {
            key: "interval".to_string(),
            value: value.to_string(),
        });
    }
    let mut segs = [0u64; 4];
    for (i, p) in parts.iter().enumerate() {
        segs[i] = p.parse().map_err(|_| ConfigError::BadValue {
            key: "interval".to_string(),
            value: value.to_string(),
        })?;
    }
    let [days, hours, minutes, seconds] = segs;
    Ok(Duration::from_secs(
        days * 86_400 + hours * 3_600 + minutes * 60 + seconds,
    ))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_scope(value: &str) -> Result<Scope, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "base" => Ok(Scope::Base),
        "one" | "onelevel" | "one-level" => Ok(Scope::OneLevel),
        "sub" | "subtree" => Ok(Scope::Subtree),
        "children" => Ok(Scope::Children),
        other => Err(ConfigError::BadValue {
            key: "scope".to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_protocol(value: &str) -> Result<ProtocolType, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "refreshonly" => Ok(ProtocolType::RefreshOnly),
        "refreshandpersist" => Ok(ProtocolType::RefreshAndPersist),
        "dirsync" => Ok(ProtocolType::DirSync),
        other => Err(ConfigError::BadValue {
            key: "type".to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_syncdata(value: &str) -> Result<DataMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Ok(DataMode::Default),
        "accesslog" => Ok(DataMode::AccessLog),
        "changelog" => Ok(DataMode::ChangeLog),
        other => Err(ConfigError::BadValue {
            key: "syncdata".to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_attr_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses one directive line into a [`ReplicaDirective`].
pub fn parse_directive(line: &str) -> Result<ReplicaDirective, ConfigError> {
    let tokens = tokenize(line)?;
    let mut values: HashMap<String, String> = tokens.into_iter().collect();

    let rid = values
        .remove("rid")
        .ok_or(ConfigError::MissingKey("rid"))?
        .parse::<u16>()
        .map_err(|_| ConfigError::BadValue {
            key: "rid".to_string(),
            value: "".to_string(),
        })?;
    let provider = values.remove("provider").ok_or(ConfigError::MissingKey("provider"))?;
    let searchbase = values.remove("searchbase").ok_or(ConfigError::MissingKey("searchbase"))?;

    let scope = values.remove("scope").map(|v| parse_scope(&v)).transpose()?.unwrap_or(Scope::Subtree);
    let filter = values.remove("filter").unwrap_or_else(|| "(objectClass=*)".to_string());

    let (all_user_attrs, all_op_attrs, attrs) = match values.remove("attrs") {
        Some(v) if v == "*" => (true, false, Vec::new()),
        Some(v) if v == "+" => (false, true, Vec::new()),
        Some(v) => (false, false, parse_attr_list(&v)),
        None => (true, false, Vec::new()),
    };
    let exattrs = values.remove("exattrs").map(|v| parse_attr_list(&v)).unwrap_or_default();
    let size_limit = values
        .remove("sizelimit")
        .map(|v| v.parse::<u32>())
        .transpose()
        .map_err(|_| ConfigError::BadValue {
            key: "sizelimit".to_string(),
            value: String::new(),
        })?;
    let time_limit = values
        .remove("timelimit")
        .map(|v| v.parse::<u32>())
        .transpose()
        .map_err(|_| ConfigError::BadValue {
            key: "timelimit".to_string(),
            value: String::new(),
        })?;

    let search = SearchParams {
        base: searchbase,
        scope,
        filter,
        attrs,
        exattrs,
        all_user_attrs,
        all_op_attrs,
        size_limit,
        time_limit,
    };

    let suffix_rewrite = values
        .remove("suffixmassage")
        .map(|v| {
            let (from, to) = v
                .split_once("->")
                .ok_or_else(|| ConfigError::BadValue {
                    key: "suffixmassage".to_string(),
                    value: v.clone(),
                })?;
            Ok::<_, ConfigError>(SuffixRewrite::new(from.trim(), to.trim()))
        })
        .transpose()?;

    let protocol = values.remove("type").map(|v| parse_protocol(&v)).transpose()?.unwrap_or(ProtocolType::RefreshOnly);
    let syncdata = values.remove("syncdata").map(|v| parse_syncdata(&v)).transpose()?.unwrap_or(DataMode::Default);
    let interval = values
        .remove("interval")
        .map(|v| parse_interval(&v))
        .transpose()?
        .unwrap_or(Duration::from_secs(86_400));
    let retry = values
        .remove("retry")
        .map(|v| parse_retry_directive(&v))
        .transpose()?
        .unwrap_or_else(|| parse_retry_directive("60 +").expect("literal retry grammar is valid"));

    let schemachecking = values
        .remove("schemachecking")
        .map(|v| parse_bool("schemachecking", &v))
        .transpose()?
        .unwrap_or(true);
    let log_base = values.remove("logbase");
    let log_filter = values.remove("logfilter");
    let managedsait = values
        .remove("managedsait")
        .map(|v| parse_bool("managedsait", &v))
        .transpose()?
        .unwrap_or(false);
    let strictrefresh = values
        .remove("strictrefresh")
        .map(|v| parse_bool("strictrefresh", &v))
        .transpose()?
        .unwrap_or(false);
    let lazycommit = values
        .remove("lazycommit")
        .map(|v| parse_bool("lazycommit", &v))
        .transpose()?
        .unwrap_or(false);

    // Everything left over is a bind/TLS/auth option passed through as-is.
    let passthrough = values;

    Ok(ReplicaDirective {
        rid,
        provider,
        search,
        suffix_rewrite,
        protocol,
        syncdata,
        interval,
        retry,
        schemachecking,
        log_base,
        log_filter,
        managedsait,
        strictrefresh,
        lazycommit,
        passthrough,
    })
}

/// Parses a whole config file: one directive per non-blank, non-comment
/// (`#`) line.
pub fn parse_config(text: &str) -> Result<Vec<ReplicaDirective>, ConfigError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_directive)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parses_minimal_directive() {
        let d = parse_directive(r#"syncrepl rid=1 provider=ldap://host searchbase=dc=example,dc=com"#).unwrap();
        assert_eq!(d.rid, 1);
        assert_eq!(d.provider, "ldap://host");
        assert_eq!(d.search.base, "dc=example,dc=com");
        assert_eq!(d.protocol, ProtocolType::RefreshOnly);
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_directive("rid=1 rid=2 provider=x searchbase=y").unwrap_err();
        assert_eq!(err, ConfigError::DuplicateKey("rid".to_string()));
    }

    #[test]
    fn rejects_missing_required_key() {
        let err = parse_directive("provider=x searchbase=y").unwrap_err();
        assert_eq!(err, ConfigError::MissingKey("rid"));
    }

    #[test]
    fn filter_with_spaces_needs_quoting() {
        let d = parse_directive(
            r#"rid=1 provider=x searchbase=y filter="(&(objectClass=person)(cn=*))""#,
        )
        .unwrap();
        assert_eq!(d.search.filter, "(&(objectClass=person)(cn=*))");
    }

    #[test]
    fn attrs_star_means_all_user_attrs() {
        let d = parse_directive("rid=1 provider=x searchbase=y attrs=*").unwrap();
        assert!(d.search.all_user_attrs);
    }

    #[test]
    fn attrs_plus_means_all_operational_attrs() {
        let d = parse_directive("rid=1 provider=x searchbase=y attrs=+").unwrap();
        assert!(d.search.all_op_attrs);
    }

    #[test_case("60", Duration::from_secs(60); "plain seconds")]
    #[test_case("1:02:03:04", Duration::from_secs(86_400 + 2*3600 + 3*60 + 4); "d:h:m:s")]
    fn interval_grammar(input: &str, expected: Duration) {
        assert_eq!(parse_interval(input).unwrap(), expected);
    }

    #[test]
    fn retry_directive_parses_into_schedule() {
        let d = parse_directive("rid=1 provider=x searchbase=y retry=\"5 3 60 +\"").unwrap();
        assert!(!d.retry.is_exhausted());
    }

    #[test]
    fn unrecognized_keys_pass_through_for_the_transport() {
        let d = parse_directive("rid=1 provider=x searchbase=y binddn=cn=admin credentials=secret").unwrap();
        assert_eq!(d.passthrough.get("binddn").map(String::as_str), Some("cn=admin"));
        assert_eq!(d.passthrough.get("credentials").map(String::as_str), Some("secret"));
    }

    #[test]
    fn suffixmassage_parses_from_and_to() {
        let d = parse_directive("rid=1 provider=x searchbase=y suffixmassage=\"dc=remote->dc=local\"").unwrap();
        let rewrite = d.suffix_rewrite.unwrap();
        assert_eq!(rewrite.rewrite("ou=people,dc=remote"), "ou=people,dc=local");
    }

    #[test]
    fn parse_config_skips_blank_and_comment_lines() {
        let text = "# comment\n\nrid=1 provider=x searchbase=y\n";
        let directives = parse_config(text).unwrap();
        assert_eq!(directives.len(), 1);
    }
}
