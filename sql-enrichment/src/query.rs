use crate::inputs::PlaceholderMap;

/// A validated SQL template with positional `?` markers.
///
/// Markers inside quoted literals (`'?'`), quoted identifiers (`"?"`), MySQL
/// backtick identifiers and comments (`-- ?`, `/* ? */`) are not
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    sql: String,
    postgres_sql: String,
    placeholder_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

impl Query {
    pub fn parse(sql: &str) -> Result<Self, String> {
        if sql.trim().is_empty() {
            return Err("query.sql must not be empty".to_string());
        }

        let mut postgres_sql = String::with_capacity(sql.len() + 8);
        let mut placeholder_count = 0;
        let mut state = Scan::Code;
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            if state == Scan::Code && c == '?' {
                placeholder_count += 1;
                postgres_sql.push('$');
                postgres_sql.push_str(&placeholder_count.to_string());
                continue;
            }

            postgres_sql.push(c);
            state = match (state, c) {
                (Scan::Code, '\'' | '"' | '`') => Scan::Quoted(c),
                (Scan::Code, '-') if chars.peek() == Some(&'-') => Scan::LineComment,
                (Scan::Code, '/') if chars.peek() == Some(&'*') => {
                    // Consume the '*' so "/*/" does not read as open and close.
                    chars.next();
                    postgres_sql.push('*');
                    Scan::BlockComment
                }
                // A doubled quote closes and immediately reopens, which is
                // the escape both dialects use.
                (Scan::Quoted(open), c) if c == open => Scan::Code,
                (Scan::LineComment, '\n') => Scan::Code,
                (Scan::BlockComment, '*') if chars.peek() == Some(&'/') => {
                    chars.next();
                    postgres_sql.push('/');
                    Scan::Code
                }
                (state, _) => state,
            };
        }

        match state {
            Scan::Quoted(open) => Err(format!("query.sql has an unterminated {open} quote")),
            Scan::BlockComment => Err("query.sql has an unterminated /* comment".to_string()),
            Scan::Code | Scan::LineComment => Ok(Self {
                sql: sql.to_string(),
                postgres_sql,
                placeholder_count,
            }),
        }
    }

    /// The template as configured, with `?` markers.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The template with `$1..$n` markers.
    pub fn postgres_sql(&self) -> &str {
        &self.postgres_sql
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholder_count
    }

    /// True when `map` has a value for every marker in the template.
    pub fn is_satisfied_by(&self, map: &PlaceholderMap) -> bool {
        map.fills(self.placeholder_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::PlaceholderValue;
    use test_case::test_case;

    #[test_case("SELECT * FROM users WHERE id = ?", 1, "SELECT * FROM users WHERE id = $1"; "single")]
    #[test_case("SELECT a FROM t WHERE x = ? AND y = ?", 2, "SELECT a FROM t WHERE x = $1 AND y = $2"; "two")]
    #[test_case("SELECT '?' AS q, \"a?\" FROM t WHERE x = ?", 1, "SELECT '?' AS q, \"a?\" FROM t WHERE x = $1"; "quoted markers")]
    #[test_case("SELECT 'it''s ?' FROM t WHERE x = ?", 1, "SELECT 'it''s ?' FROM t WHERE x = $1"; "escaped quote")]
    #[test_case("SELECT `col?` FROM t", 0, "SELECT `col?` FROM t"; "backtick identifier")]
    #[test_case("SELECT plan FROM accounts WHERE id = ? -- is this user active?", 1, "SELECT plan FROM accounts WHERE id = $1 -- is this user active?"; "line comment")]
    #[test_case("SELECT plan -- which plan?\nFROM accounts WHERE id = ?", 1, "SELECT plan -- which plan?\nFROM accounts WHERE id = $1"; "line comment ends at newline")]
    #[test_case("SELECT /* ? */ plan FROM accounts WHERE id = ?", 1, "SELECT /* ? */ plan FROM accounts WHERE id = $1"; "block comment")]
    #[test_case("SELECT 10 - ? FROM t", 1, "SELECT 10 - $1 FROM t"; "minus is not a comment")]
    #[test_case("SELECT '--' AS dashes FROM t WHERE x = ?", 1, "SELECT '--' AS dashes FROM t WHERE x = $1"; "dashes in literal")]
    fn test_parse_counts_markers(sql: &str, count: usize, postgres: &str) {
        let query = Query::parse(sql).unwrap();
        assert_eq!(query.placeholder_count(), count);
        assert_eq!(query.postgres_sql(), postgres);
        assert_eq!(query.sql(), sql);
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("SELECT 'open FROM t WHERE x = ?"; "unterminated")]
    #[test_case("SELECT plan FROM t WHERE x = ? /* note"; "unterminated block comment")]
    fn test_parse_rejects(sql: &str) {
        assert!(Query::parse(sql).is_err());
    }

    #[test]
    fn test_satisfied_only_when_every_marker_is_filled() {
        let query = Query::parse("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();

        let mut map = PlaceholderMap::new();
        map.insert(1, PlaceholderValue::Boolean(true));
        assert!(!query.is_satisfied_by(&map));

        map.insert(2, PlaceholderValue::String("b".to_string()));
        assert!(query.is_satisfied_by(&map));
    }
}
