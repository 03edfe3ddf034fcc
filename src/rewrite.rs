//! Placeholder rewriting.
//!
//! Converts the parameter markers of the supported paramstyles into the
//! server's native `$n` markers. The scanner tracks quoting and comments so
//! markers inside string literals, quoted identifiers, dollar-quoted bodies
//! and comments are left alone.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Placeholder syntax accepted in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ParamStyle {
    /// `WHERE a = ?`
    Qmark,
    /// `WHERE a = :1`
    Numeric,
    /// `WHERE a = :name`
    Named,
    /// `WHERE a = %s`
    #[default]
    Format,
    /// `WHERE a = %(name)s`
    Pyformat,
}

impl ParamStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamStyle::Qmark => "qmark",
            ParamStyle::Numeric => "numeric",
            ParamStyle::Named => "named",
            ParamStyle::Format => "format",
            ParamStyle::Pyformat => "pyformat",
        }
    }
}

impl FromStr for ParamStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qmark" => Ok(ParamStyle::Qmark),
            "numeric" => Ok(ParamStyle::Numeric),
            "named" => Ok(ParamStyle::Named),
            "format" => Ok(ParamStyle::Format),
            "pyformat" => Ok(ParamStyle::Pyformat),
            other => Err(Error::Param(format!("unknown paramstyle {:?}", other))),
        }
    }
}

impl fmt::Display for ParamStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Params<V> {
    Positional(Vec<V>),
    Named(Vec<(String, V)>),
}

impl<V> Params<V> {
    /// Named parameters from `(name, value)` pairs.
    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Params::Positional(v) => v.len(),
            Params::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for Params<V> {
    fn default() -> Self {
        Params::Positional(Vec::new())
    }
}

impl<V> From<Vec<V>> for Params<V> {
    fn from(v: Vec<V>) -> Self {
        Params::Positional(v)
    }
}

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    SingleQuoted,
    QuotedIdentifier,
    /// `E'...'` with backslash escapes
    EscapeString,
    /// `$tag$...$tag$`, the tag spans `sql[start..end]`
    DollarQuoted { start: usize, end: usize },
    /// `:name`, the name starts at `start`
    PlaceholderName { start: usize },
    LineComment,
    BlockComment { depth: usize },
}

/// Maps placeholders to `$n` and collects the arguments in `$n` order.
enum Binder<V> {
    Positional {
        args: Vec<V>,
        used: usize,
    },
    Numeric {
        args: Vec<V>,
    },
    Named {
        values: HashMap<String, V>,
        index: HashMap<String, usize>,
        args: Vec<V>,
    },
}

impl<V> Binder<V> {
    fn new(style: ParamStyle, params: Params<V>) -> Result<Self> {
        match (style, params) {
            (
                ParamStyle::Qmark | ParamStyle::Format | ParamStyle::Pyformat,
                Params::Positional(args),
            ) => Ok(Binder::Positional { args, used: 0 }),
            (ParamStyle::Numeric, Params::Positional(args)) => Ok(Binder::Numeric { args }),
            (ParamStyle::Named | ParamStyle::Pyformat, Params::Named(pairs)) => {
                let mut values = HashMap::with_capacity(pairs.len());
                for (name, value) in pairs {
                    if values.insert(name.clone(), value).is_some() {
                        return Err(Error::Param(format!("duplicate parameter {:?}", name)));
                    }
                }
                Ok(Binder::Named {
                    values,
                    index: HashMap::new(),
                    args: Vec::new(),
                })
            }
            (style, Params::Named(_)) => Err(Error::Param(format!(
                "paramstyle {} takes positional parameters",
                style
            ))),
            (style, Params::Positional(_)) => Err(Error::Param(format!(
                "paramstyle {} takes named parameters",
                style
            ))),
        }
    }

    fn positional(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Binder::Positional { used, .. } => {
                *used += 1;
                push_marker(out, *used);
                Ok(())
            }
            _ => Err(Error::Param(
                "positional placeholder used with named parameters".into(),
            )),
        }
    }

    fn numbered(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Binder::Numeric { args } if (1..=args.len()).contains(&n) => {
                push_marker(out, n);
                Ok(())
            }
            Binder::Numeric { args } => Err(Error::Param(format!(
                "placeholder :{} out of range for {} parameters",
                n,
                args.len()
            ))),
            _ => Err(Error::Param("numbered placeholder in wrong paramstyle".into())),
        }
    }

    fn named(&mut self, name: &str, out: &mut Vec<u8>) -> Result<()> {
        let Binder::Named {
            values,
            index,
            args,
        } = self
        else {
            return Err(Error::Param(format!(
                "named placeholder {:?} used with positional parameters",
                name
            )));
        };
        let n = match index.get(name).copied() {
            Some(n) => n,
            None => {
                let value = values
                    .remove(name)
                    .ok_or_else(|| Error::Param(format!("no value for parameter {:?}", name)))?;
                args.push(value);
                index.insert(name.to_string(), args.len());
                args.len()
            }
        };
        push_marker(out, n);
        Ok(())
    }

    fn finish(self) -> Result<Vec<V>> {
        match self {
            Binder::Positional { args, used } if used != args.len() => Err(Error::Param(format!(
                "query has {} placeholders but {} parameters were given",
                used,
                args.len()
            ))),
            Binder::Positional { args, .. } | Binder::Numeric { args } => Ok(args),
            // Values never referenced by the query are dropped
            Binder::Named { args, .. } => Ok(args),
        }
    }
}

fn push_marker(out: &mut Vec<u8>, n: usize) {
    out.push(b'$');
    out.extend_from_slice(n.to_string().as_bytes());
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Length of the dollar-quote tag starting at `sql[i] == b'$'`, if any.
fn dollar_tag_len(sql: &[u8], i: usize) -> Option<usize> {
    if i > 0 && (is_ident_byte(sql[i - 1]) || sql[i - 1] == b'$') {
        return None;
    }
    let rest = sql.get(i + 1..)?;
    if rest.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag_len = rest.iter().position(|b| !is_ident_byte(*b))?;
    (rest[tag_len] == b'$').then_some(tag_len + 2)
}

/// Rewrite the placeholders of `style` in `sql` to `$n` markers.
///
/// Returns the rewritten SQL and the arguments ordered to match `$1..$n`.
/// Named placeholders are numbered by first occurrence; repeated names reuse
/// their number. A query without parameters is returned unchanged.
pub fn rewrite<V>(style: ParamStyle, sql: &str, params: Params<V>) -> Result<(String, Vec<V>)> {
    if params.is_empty() {
        return Ok((sql.to_string(), Vec::new()));
    }

    let mut binder = Binder::new(style, params)?;
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut state = State::Outside;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Outside => match (b, next) {
                (b'\'', _) => {
                    let escape = i > 0
                        && matches!(bytes[i - 1], b'E' | b'e')
                        && (i < 2 || !is_ident_byte(bytes[i - 2]));
                    state = if escape {
                        State::EscapeString
                    } else {
                        State::SingleQuoted
                    };
                    out.push(b);
                }
                (b'"', _) => {
                    state = State::QuotedIdentifier;
                    out.push(b);
                }
                (b'-', Some(b'-')) => {
                    state = State::LineComment;
                    out.extend_from_slice(b"--");
                    i += 1;
                }
                (b'/', Some(b'*')) => {
                    state = State::BlockComment { depth: 1 };
                    out.extend_from_slice(b"/*");
                    i += 1;
                }
                (b'$', _) => match dollar_tag_len(bytes, i) {
                    Some(len) => {
                        state = State::DollarQuoted {
                            start: i,
                            end: i + len,
                        };
                        out.extend_from_slice(&bytes[i..i + len]);
                        i += len - 1;
                    }
                    None => out.push(b),
                },
                (b'?', _) if style == ParamStyle::Qmark => binder.positional(&mut out)?,
                (b':', Some(b':' | b'=')) if matches!(style, ParamStyle::Numeric | ParamStyle::Named) => {
                    // casts and assignments
                    out.push(b);
                    out.push(bytes[i + 1]);
                    i += 1;
                }
                (b':', Some(c)) if style == ParamStyle::Numeric && c.is_ascii_digit() => {
                    let digits = bytes[i + 1..]
                        .iter()
                        .take_while(|d| d.is_ascii_digit())
                        .count();
                    let n = sql[i + 1..i + 1 + digits]
                        .parse()
                        .map_err(|_e| Error::Param("placeholder number too large".into()))?;
                    binder.numbered(n, &mut out)?;
                    i += digits;
                }
                (b':', Some(c)) if style == ParamStyle::Named && is_ident_byte(c) => {
                    state = State::PlaceholderName { start: i + 1 };
                }
                (b'%', Some(b'%')) if matches!(style, ParamStyle::Format | ParamStyle::Pyformat) => {
                    out.push(b'%');
                    i += 1;
                }
                (b'%', Some(b's')) if matches!(style, ParamStyle::Format | ParamStyle::Pyformat) => {
                    binder.positional(&mut out)?;
                    i += 1;
                }
                (b'%', Some(b'(')) if style == ParamStyle::Pyformat => {
                    let name_start = i + 2;
                    let close = bytes[name_start..]
                        .iter()
                        .position(|c| *c == b')')
                        .map(|p| name_start + p)
                        .filter(|close| bytes.get(close + 1) == Some(&b's'))
                        .ok_or_else(|| {
                            Error::Param("unterminated %(name)s placeholder".into())
                        })?;
                    binder.named(&sql[name_start..close], &mut out)?;
                    i = close + 1;
                }
                (b'%', _) if matches!(style, ParamStyle::Format | ParamStyle::Pyformat) => {
                    let shown = next.map_or_else(String::new, |c| char::from(c).to_string());
                    return Err(Error::Param(format!(
                        "unsupported format sequence %{}",
                        shown
                    )));
                }
                _ => out.push(b),
            },
            State::SingleQuoted | State::QuotedIdentifier => {
                let quote = if state == State::SingleQuoted { b'\'' } else { b'"' };
                out.push(b);
                if b == quote {
                    if next == Some(quote) {
                        out.push(quote);
                        i += 1;
                    } else {
                        state = State::Outside;
                    }
                }
            }
            State::EscapeString => {
                out.push(b);
                match (b, next) {
                    (b'\\', Some(c)) | (b'\'', Some(c @ b'\'')) => {
                        out.push(c);
                        i += 1;
                    }
                    (b'\'', _) => state = State::Outside,
                    _ => {}
                }
            }
            State::DollarQuoted { start, end } => {
                let tag = &bytes[start..end];
                if bytes[i..].starts_with(tag) {
                    out.extend_from_slice(tag);
                    i += tag.len() - 1;
                    state = State::Outside;
                } else {
                    out.push(b);
                }
            }
            State::PlaceholderName { start } => {
                if !is_ident_byte(b) {
                    binder.named(&sql[start..i], &mut out)?;
                    state = State::Outside;
                    // reprocess this byte outside the name
                    continue;
                }
            }
            State::LineComment => {
                out.push(b);
                if b == b'\n' {
                    state = State::Outside;
                }
            }
            State::BlockComment { depth } => match (b, next) {
                (b'/', Some(b'*')) => {
                    out.extend_from_slice(b"/*");
                    i += 1;
                    state = State::BlockComment { depth: depth + 1 };
                }
                (b'*', Some(b'/')) => {
                    out.extend_from_slice(b"*/");
                    i += 1;
                    state = if depth == 1 {
                        State::Outside
                    } else {
                        State::BlockComment { depth: depth - 1 }
                    };
                }
                _ => out.push(b),
            },
        }
        i += 1;
    }

    if let State::PlaceholderName { start } = state {
        binder.named(&sql[start..], &mut out)?;
    }

    let sql = String::from_utf8(out)
        .map_err(|_e| Error::Param("rewritten query is not valid UTF-8".into()))?;
    Ok((sql, binder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, i32)]) -> Params<i32> {
        Params::named(pairs.iter().copied())
    }

    #[test]
    fn qmark_skips_quotes() {
        let (sql, args) = rewrite(
            ParamStyle::Qmark,
            r#"SELECT ?, ?, "field_?" FROM t WHERE a='say ''what?''' AND b=?"#,
            Params::from(vec![1, 2, 3]),
        )
        .unwrap();
        assert_eq!(
            sql,
            r#"SELECT $1, $2, "field_?" FROM t WHERE a='say ''what?''' AND b=$3"#
        );
        assert_eq!(args, [1, 2, 3]);
    }

    #[test]
    fn numeric_leaves_casts() {
        let (sql, args) = rewrite(
            ParamStyle::Numeric,
            "SELECT :2::int, :1, x := 1",
            Params::from(vec!["a", "b"]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT $2::int, $1, x := 1");
        assert_eq!(args, ["a", "b"]);

        assert!(matches!(
            rewrite(ParamStyle::Numeric, "SELECT :3", Params::from(vec![1])),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn named_numbers_by_first_occurrence() {
        let (sql, args) = rewrite(
            ParamStyle::Named,
            "SELECT :b, :a, :b, ':a' -- :a\n, :a::text",
            named(&[("a", 1), ("b", 2), ("unused", 3)]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT $1, $2, $1, ':a' -- :a\n, $2::text");
        assert_eq!(args, [2, 1]);

        assert!(matches!(
            rewrite(ParamStyle::Named, "SELECT :missing", named(&[("a", 1)])),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn named_at_end_of_input() {
        let (sql, args) =
            rewrite(ParamStyle::Named, "SELECT * FROM t WHERE id=:id", named(&[("id", 9)]))
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id=$1");
        assert_eq!(args, [9]);
    }

    #[test]
    fn format_and_percent_escapes() {
        let (sql, _) = rewrite(
            ParamStyle::Format,
            "SELECT %s, 10 %% 3, '%s'",
            Params::from(vec![1]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT $1, 10 % 3, '%s'");

        assert!(matches!(
            rewrite(ParamStyle::Format, "SELECT %d", Params::from(vec![1])),
            Err(Error::Param(_))
        ));
        assert!(matches!(
            rewrite(ParamStyle::Format, "SELECT %s, %s", Params::from(vec![1])),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn pyformat_named_and_mixing() {
        let (sql, args) = rewrite(
            ParamStyle::Pyformat,
            "SELECT %(x)s, %(y)s, %(x)s",
            named(&[("y", 2), ("x", 1)]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT $1, $2, $1");
        assert_eq!(args, [1, 2]);

        assert!(matches!(
            rewrite(ParamStyle::Pyformat, "SELECT %(x)s, %s", named(&[("x", 1)])),
            Err(Error::Param(_))
        ));
        assert!(matches!(
            rewrite(ParamStyle::Pyformat, "SELECT %(x)s", Params::from(vec![1])),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn escape_strings_and_dollar_quotes() {
        let (sql, _) = rewrite(
            ParamStyle::Qmark,
            r"SELECT E'it\'s ?', $fn$ ? $fn$, $$?$$, ?",
            Params::from(vec![1]),
        )
        .unwrap();
        assert_eq!(sql, r"SELECT E'it\'s ?', $fn$ ? $fn$, $$?$$, $1");
    }

    #[test]
    fn nested_block_comments() {
        let (sql, _) = rewrite(
            ParamStyle::Qmark,
            "/* a /* ? */ ? */ SELECT ?",
            Params::from(vec![1]),
        )
        .unwrap();
        assert_eq!(sql, "/* a /* ? */ ? */ SELECT $1");
    }

    #[test]
    fn style_and_params_must_agree() {
        assert!(matches!(
            rewrite(ParamStyle::Qmark, "SELECT ?", named(&[("a", 1)])),
            Err(Error::Param(_))
        ));
        assert!(matches!(
            rewrite(ParamStyle::Named, "SELECT :a", Params::from(vec![1])),
            Err(Error::Param(_))
        ));
    }

    #[test]
    fn no_params_is_passthrough() {
        let (sql, args) =
            rewrite::<i32>(ParamStyle::Format, "SELECT 10 % 3", Params::default()).unwrap();
        assert_eq!(sql, "SELECT 10 % 3");
        assert!(args.is_empty());
        assert_eq!("pyformat".parse::<ParamStyle>().unwrap(), ParamStyle::Pyformat);
        assert!("bogus".parse::<ParamStyle>().is_err());
    }
}
