//! Parser for the textual form of the binary log.
//!
//! The log reader decodes row events into pseudo-comment lines (`### INSERT
//! INTO ...`, `###   @1=...`) plus plain statement text for everything that
//! was logged as a statement. This module turns that text into a typed event
//! stream the script generator can consume. Row images are positional; the
//! reader is invoked with table metadata printing enabled so the `# Columns(`
//! blocks give us the column names to reconstruct real DML.

use chrono::{DateTime, Utc};
use rewind_core::{Result, RewindError};
use std::collections::HashMap;

/// One event in replay order.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    /// `SET TIMESTAMP=...` cursor update. Applies to every following event
    /// until the next one.
    Timestamp(DateTime<Utc>),
    Begin,
    Commit,
    Rollback,
    /// A decoded row-level change.
    RowChange(RowImage),
    /// A complete single-line statement event, DDL or statement-logged DML.
    SchemaChange(String),
}

impl ReplayEvent {
    /// The executable SQL of a row or schema change; `None` for control
    /// events.
    pub fn statement(&self) -> Option<String> {
        match self {
            ReplayEvent::RowChange(image) => Some(image.to_sql()),
            ReplayEvent::SchemaChange(sql) => Some(sql.clone()),
            _ => None,
        }
    }
}

/// A decoded column value from a row image.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    /// Contents between the quotes, escapes preserved as the reader printed
    /// them.
    String(String),
    /// Anything else (hex blobs, bit literals). Emitted verbatim.
    Raw(String),
}

impl SqlValue {
    fn parse(text: &str) -> SqlValue {
        let text = text.trim();
        if text == "NULL" {
            return SqlValue::Null;
        }
        if let Ok(n) = text.parse::<i64>() {
            return SqlValue::Integer(n);
        }
        if let Ok(f) = text.parse::<f64>() {
            return SqlValue::Float(f);
        }
        if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
            return SqlValue::String(text[1..text.len() - 1].to_string());
        }
        SqlValue::Raw(text.to_string())
    }

    /// Render as a SQL literal.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(n) => n.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::String(s) => format!("'{s}'"),
            SqlValue::Raw(r) => r.clone(),
        }
    }

    /// Render as a WHERE predicate against `column`. NULL compares with `IS`.
    fn predicate(&self, column: &str) -> String {
        match self {
            SqlValue::Null => format!("{column} IS NULL"),
            other => format!("{column}={}", other.render()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

/// A fully resolved row change: operation, table, column names (when the
/// reader printed table metadata) and the before/after value images.
/// Arity against the column list is validated at parse time, so rendering
/// cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage {
    pub op: RowOp,
    pub table: String,
    pub columns: Option<Vec<String>>,
    /// WHERE image for UPDATE and DELETE.
    pub before: Vec<SqlValue>,
    /// SET image for INSERT and UPDATE.
    pub after: Vec<SqlValue>,
}

impl RowImage {
    pub fn to_sql(&self) -> String {
        match self.op {
            RowOp::Insert => {
                let values: Vec<String> = self.after.iter().map(SqlValue::render).collect();
                match &self.columns {
                    Some(cols) => format!(
                        "INSERT INTO {} ({}) VALUES ({});",
                        self.table,
                        cols.join(", "),
                        values.join(", ")
                    ),
                    // Positional insert still round-trips without metadata.
                    None => format!("INSERT INTO {} VALUES ({});", self.table, values.join(", ")),
                }
            }
            RowOp::Update => {
                let cols = self.columns.as_deref().unwrap_or_default();
                let sets: Vec<String> = cols
                    .iter()
                    .zip(&self.after)
                    .map(|(c, v)| format!("{c}={}", v.render()))
                    .collect();
                let wheres: Vec<String> = cols
                    .iter()
                    .zip(&self.before)
                    .map(|(c, v)| v.predicate(c))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {} LIMIT 1;",
                    self.table,
                    sets.join(", "),
                    wheres.join(" AND ")
                )
            }
            RowOp::Delete => {
                let cols = self.columns.as_deref().unwrap_or_default();
                let wheres: Vec<String> = cols
                    .iter()
                    .zip(&self.before)
                    .map(|(c, v)| v.predicate(c))
                    .collect();
                format!(
                    "DELETE FROM {} WHERE {} LIMIT 1;",
                    self.table,
                    wheres.join(" AND ")
                )
            }
        }
    }
}

/// A row event mid-assembly, before its column names are resolved.
struct PendingRow {
    op: RowOp,
    table: String,
    before: Vec<SqlValue>,
    after: Vec<SqlValue>,
    filling_after: bool,
}

/// Streaming parser over the reader's output lines.
pub struct EventParser {
    /// Column names per table, keyed by the backquoted `db`.`table` form the
    /// reader prints.
    columns: HashMap<String, Vec<String>>,
    /// Table named by the most recent table-map line; its `# Columns(` block
    /// follows.
    last_mapped: Option<String>,
    column_block: Option<String>,
    pending_row: Option<PendingRow>,
    /// Multi-line statement accumulation, joined with single spaces.
    partial_statement: Option<String>,
    events: Vec<ReplayEvent>,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventParser {
    pub fn new() -> Self {
        Self {
            columns: HashMap::new(),
            last_mapped: None,
            column_block: None,
            pending_row: None,
            partial_statement: None,
            events: Vec::new(),
        }
    }

    pub fn parse_text(text: &str) -> Result<Vec<ReplayEvent>> {
        let mut parser = Self::new();
        for line in text.lines() {
            parser.push_line(line)?;
        }
        parser.finish()
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        if let Some(block) = &mut self.column_block {
            // Continuation lines of a multi-line `# Columns(` block.
            if let Some(rest) = line.strip_prefix('#') {
                block.push(' ');
                block.push_str(rest.trim());
                if rest.trim_end().ends_with(')') {
                    self.finish_column_block();
                }
                return Ok(());
            }
            self.finish_column_block();
        }

        if let Some(row_line) = line.strip_prefix("### ") {
            return self.push_row_line(row_line);
        }
        if line == "###" {
            return Ok(());
        }
        self.flush_pending_row()?;

        if let Some(rest) = line.strip_prefix('#') {
            let rest = rest.trim();
            if let Some(map) = rest.split("Table_map: ").nth(1) {
                if let Some(table) = map.split(" mapped to").next() {
                    self.last_mapped = Some(table.trim().to_string());
                }
                return Ok(());
            }
            if let Some(body) = rest.strip_prefix("Columns(") {
                self.column_block = Some(body.to_string());
                if body.trim_end().ends_with(')') {
                    self.finish_column_block();
                }
                return Ok(());
            }
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        self.push_statement_line(trimmed)
    }

    fn push_statement_line(&mut self, line: &str) -> Result<()> {
        let (body, terminated) = match line.strip_suffix("/*!*/;") {
            Some(body) => (body.trim_end(), true),
            None => (line, false),
        };

        let mut statement = match self.partial_statement.take() {
            Some(mut prefix) => {
                if !body.is_empty() {
                    prefix.push(' ');
                    prefix.push_str(body);
                }
                prefix
            }
            None => body.to_string(),
        };

        if !terminated {
            // Control words and client directives arrive without the
            // delimiter suffix on their own line.
            match statement.as_str() {
                "BEGIN" => {
                    self.events.push(ReplayEvent::Begin);
                    return Ok(());
                }
                "COMMIT" | "COMMIT;" => {
                    self.events.push(ReplayEvent::Commit);
                    return Ok(());
                }
                "ROLLBACK" | "ROLLBACK;" => {
                    self.events.push(ReplayEvent::Rollback);
                    return Ok(());
                }
                _ => {}
            }
            if statement.starts_with("DELIMITER") {
                return Ok(());
            }
            self.partial_statement = Some(statement);
            return Ok(());
        }

        if statement.ends_with(';') {
            statement.pop();
        }
        let statement = statement.trim().to_string();
        if statement.starts_with("DELIMITER") {
            return Ok(());
        }
        match statement.as_str() {
            "" => Ok(()),
            "BEGIN" => {
                self.events.push(ReplayEvent::Begin);
                Ok(())
            }
            "COMMIT" => {
                self.events.push(ReplayEvent::Commit);
                Ok(())
            }
            "ROLLBACK" => {
                self.events.push(ReplayEvent::Rollback);
                Ok(())
            }
            _ => {
                if let Some(ts) = statement.strip_prefix("SET TIMESTAMP=") {
                    let seconds = ts.split('.').next().unwrap_or(ts);
                    let epoch: i64 = seconds.parse().map_err(|_| {
                        RewindError::Parse(format!("bad timestamp value {ts:?}"))
                    })?;
                    let instant = DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
                        RewindError::Parse(format!("timestamp {epoch} is out of range"))
                    })?;
                    self.events.push(ReplayEvent::Timestamp(instant));
                    return Ok(());
                }
                // Session noise the reader emits around real statements.
                if statement.starts_with("SET @@")
                    || statement.starts_with("SET @`")
                    || statement.starts_with("/*!")
                    || statement.starts_with("ROLLBACK /*")
                {
                    return Ok(());
                }
                self.events
                    .push(ReplayEvent::SchemaChange(format!("{statement};")));
                Ok(())
            }
        }
    }

    fn push_row_line(&mut self, line: &str) -> Result<()> {
        if let Some(table) = line.strip_prefix("INSERT INTO ") {
            self.flush_pending_row()?;
            self.pending_row = Some(PendingRow {
                op: RowOp::Insert,
                table: table.trim().to_string(),
                before: Vec::new(),
                after: Vec::new(),
                filling_after: true,
            });
            return Ok(());
        }
        if let Some(table) = line.strip_prefix("UPDATE ") {
            self.flush_pending_row()?;
            self.pending_row = Some(PendingRow {
                op: RowOp::Update,
                table: table.trim().to_string(),
                before: Vec::new(),
                after: Vec::new(),
                filling_after: false,
            });
            return Ok(());
        }
        if let Some(table) = line.strip_prefix("DELETE FROM ") {
            self.flush_pending_row()?;
            self.pending_row = Some(PendingRow {
                op: RowOp::Delete,
                table: table.trim().to_string(),
                before: Vec::new(),
                after: Vec::new(),
                filling_after: false,
            });
            return Ok(());
        }

        let row = self.pending_row.as_mut().ok_or_else(|| {
            RewindError::Parse(format!("row image line outside a row event: ### {line}"))
        })?;
        match line.trim() {
            "WHERE" => {
                row.filling_after = false;
                Ok(())
            }
            "SET" => {
                row.filling_after = true;
                Ok(())
            }
            value_line => {
                if !value_line.starts_with('@') {
                    return Err(RewindError::Parse(format!(
                        "malformed row value line: ### {line}"
                    )));
                }
                let Some(eq) = value_line.find('=') else {
                    return Err(RewindError::Parse(format!(
                        "malformed row value line: ### {line}"
                    )));
                };
                let value = SqlValue::parse(&value_line[eq + 1..]);
                if row.filling_after {
                    row.after.push(value);
                } else {
                    row.before.push(value);
                }
                Ok(())
            }
        }
    }

    fn finish_column_block(&mut self) {
        let Some(block) = self.column_block.take() else {
            return;
        };
        let names: Vec<String> = extract_backquoted(&block);
        if let Some(table) = &self.last_mapped {
            if !names.is_empty() {
                self.columns.insert(table.clone(), names);
            }
        }
    }

    fn flush_pending_row(&mut self) -> Result<()> {
        let Some(row) = self.pending_row.take() else {
            return Ok(());
        };
        let columns = self.columns.get(&row.table).cloned();
        match &columns {
            Some(cols) => {
                for image in [&row.before, &row.after] {
                    if !image.is_empty() && image.len() != cols.len() {
                        return Err(RewindError::Parse(format!(
                            "table {} has {} columns but the row image has {} values",
                            row.table,
                            cols.len(),
                            image.len()
                        )));
                    }
                }
            }
            // Updates and deletes need names for SET and WHERE clauses.
            None if row.op != RowOp::Insert => {
                return Err(RewindError::Parse(format!(
                    "row image for {} needs column names but no table metadata was printed; \
                     re-run the log reader with table metadata enabled",
                    row.table
                )));
            }
            None => {}
        }
        self.events.push(ReplayEvent::RowChange(RowImage {
            op: row.op,
            table: row.table,
            columns,
            before: row.before,
            after: row.after,
        }));
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<ReplayEvent>> {
        self.flush_pending_row()?;
        if let Some(partial) = self.partial_statement.take() {
            return Err(RewindError::Parse(format!(
                "log text ended inside an unterminated statement: {partial}"
            )));
        }
        Ok(self.events)
    }
}

/// Column names are the only backquoted tokens inside a `# Columns(` block.
fn extract_backquoted(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('`') else { break };
        names.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# at 4
#251126  2:10:00 server id 1  end_log_pos 126 CRC32 0x1234abcd \tStart: binlog v 4
SET TIMESTAMP=1764123000/*!*/;
BEGIN
/*!*/;
# at 300
#251126  2:10:00 server id 1  end_log_pos 370 \tTable_map: `shop`.`orders` mapped to number 108
# Columns(`id` INT NOT NULL,
#         `customer` VARCHAR(40),
#         `amount` DECIMAL(10,2))
### INSERT INTO `shop`.`orders`
### SET
###   @1=11
###   @2='alice'
###   @3=19.99
COMMIT/*!*/;
SET TIMESTAMP=1764123600/*!*/;
CREATE TABLE `shop`.`audit` (id INT)
/*!*/;
";

    #[test]
    fn parses_transaction_with_row_insert() {
        let events = EventParser::parse_text(SAMPLE).unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            ReplayEvent::Timestamp(DateTime::from_timestamp(1764123000, 0).unwrap())
        );
        assert_eq!(events[1], ReplayEvent::Begin);
        assert_eq!(
            events[2].statement().unwrap(),
            "INSERT INTO `shop`.`orders` (id, customer, amount) VALUES (11, 'alice', 19.99);"
        );
        assert_eq!(events[3], ReplayEvent::Commit);
        assert_eq!(
            events[5],
            ReplayEvent::SchemaChange("CREATE TABLE `shop`.`audit` (id INT);".to_string())
        );
    }

    #[test]
    fn row_change_carries_the_typed_image() {
        let events = EventParser::parse_text(SAMPLE).unwrap();
        let ReplayEvent::RowChange(image) = &events[2] else {
            panic!("expected a row change, got {:?}", events[2]);
        };
        assert_eq!(image.op, RowOp::Insert);
        assert_eq!(image.table, "`shop`.`orders`");
        assert_eq!(
            image.columns.as_deref(),
            Some(&["id".to_string(), "customer".to_string(), "amount".to_string()][..])
        );
        assert_eq!(image.after[1], SqlValue::String("alice".to_string()));
    }

    #[test]
    fn update_uses_before_image_as_predicate() {
        let text = "\
#251126 Table_map: `shop`.`orders` mapped to number 108
# Columns(`id` INT, `customer` VARCHAR(40))
### UPDATE `shop`.`orders`
### WHERE
###   @1=11
###   @2='alice'
### SET
###   @1=11
###   @2='bob'
";
        let events = EventParser::parse_text(text).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].statement().unwrap(),
            "UPDATE `shop`.`orders` SET id=11, customer='bob' \
             WHERE id=11 AND customer='alice' LIMIT 1;"
        );
    }

    #[test]
    fn delete_with_null_column_uses_is_null() {
        let text = "\
#251126 Table_map: `shop`.`orders` mapped to number 108
# Columns(`id` INT, `customer` VARCHAR(40))
### DELETE FROM `shop`.`orders`
### WHERE
###   @1=11
###   @2=NULL
";
        let events = EventParser::parse_text(text).unwrap();
        assert_eq!(
            events[0].statement().unwrap(),
            "DELETE FROM `shop`.`orders` WHERE id=11 AND customer IS NULL LIMIT 1;"
        );
    }

    #[test]
    fn update_without_metadata_is_a_parse_error() {
        let text = "\
### UPDATE `shop`.`orders`
### WHERE
###   @1=11
### SET
###   @1=12
";
        let err = EventParser::parse_text(text).unwrap_err();
        assert!(matches!(err, RewindError::Parse(_)));
    }

    #[test]
    fn insert_without_metadata_falls_back_to_positional() {
        let text = "\
### INSERT INTO `shop`.`orders`
### SET
###   @1=11
###   @2='alice'
";
        let events = EventParser::parse_text(text).unwrap();
        assert_eq!(
            events[0].statement().unwrap(),
            "INSERT INTO `shop`.`orders` VALUES (11, 'alice');"
        );
    }

    #[test]
    fn arity_mismatch_is_a_parse_error() {
        let text = "\
#251126 Table_map: `shop`.`orders` mapped to number 108
# Columns(`id` INT, `customer` VARCHAR(40))
### INSERT INTO `shop`.`orders`
### SET
###   @1=11
";
        let err = EventParser::parse_text(text).unwrap_err();
        assert!(matches!(err, RewindError::Parse(_)));
    }

    #[test]
    fn multi_line_ddl_joins_into_one_statement() {
        let text = "\
SET TIMESTAMP=1764123600/*!*/;
CREATE TABLE t (
  id INT,
  name VARCHAR(10)
)
/*!*/;
";
        let events = EventParser::parse_text(text).unwrap();
        assert_eq!(
            events[1],
            ReplayEvent::SchemaChange("CREATE TABLE t ( id INT, name VARCHAR(10) );".to_string())
        );
    }

    #[test]
    fn session_noise_is_dropped() {
        let text = "\
/*!50530 SET @@SESSION.PSEUDO_SLAVE_MODE=1*/;
SET @@session.sql_mode=1436549152/*!*/;
DELIMITER /*!*/;
SET TIMESTAMP=1764123600/*!*/;
ROLLBACK /* added by mysqlbinlog */ /*!*/;
";
        let events = EventParser::parse_text(text).unwrap();
        assert_eq!(
            events,
            vec![ReplayEvent::Timestamp(
                DateTime::from_timestamp(1764123600, 0).unwrap()
            )]
        );
    }

    #[test]
    fn value_parsing_covers_literal_kinds() {
        assert_eq!(SqlValue::parse("NULL"), SqlValue::Null);
        assert_eq!(SqlValue::parse("-42"), SqlValue::Integer(-42));
        assert_eq!(SqlValue::parse("3.5"), SqlValue::Float(3.5));
        assert_eq!(
            SqlValue::parse("'it\\'s'"),
            SqlValue::String("it\\'s".to_string())
        );
        assert_eq!(
            SqlValue::parse("0xDEADBEEF"),
            SqlValue::Raw("0xDEADBEEF".to_string())
        );
        assert_eq!(SqlValue::String("a".into()).render(), "'a'");
    }
}
