//! Splits a migration file into individually executable CQL statements.
//!
//! The driver executes exactly one statement per request, while migration
//! files routinely contain several. The splitter is line-based and
//! deliberately not a CQL tokenizer: statements end at a line whose trimmed
//! form ends with `;`, full-line `--` comments and blank lines are dropped,
//! and a trailing statement without `;` is still emitted.
//!
//! Known limitations, kept for compatibility with existing migration files:
//! a trailing `-- comment` after `;` on the same line suppresses statement
//! termination and the comment text rides along inside the statement;
//! multiple `;`-separated statements on one line are not split; a string
//! literal ending a line with `;` terminates the statement early.

/// Splits migration content into trimmed CQL statements, in file order.
pub(crate) fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in content.split('\n') {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            let statement = statement.strip_suffix(';').unwrap_or(statement).trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    // Tolerate a final statement without a trailing semicolon.
    let remaining = current.trim();
    if !remaining.is_empty() {
        statements.push(remaining.to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_statements_and_strips_comments() {
        let input = "-- c\nCREATE TABLE a;\n\n-- d\nCREATE TABLE b;\nDROP TABLE c";
        assert_eq!(
            split_statements(input),
            vec!["CREATE TABLE a", "CREATE TABLE b", "DROP TABLE c"]
        );
    }

    #[test]
    fn empty_input_yields_no_statements() {
        assert!(split_statements("").is_empty());
    }

    #[test]
    fn whitespace_only_input_yields_no_statements() {
        assert!(split_statements("  \n\t\n   \n").is_empty());
    }

    #[test]
    fn comment_only_input_yields_no_statements() {
        assert!(split_statements("-- one\n  -- two\n--three").is_empty());
    }

    #[test]
    fn lone_semicolons_are_dropped() {
        assert!(split_statements(";\n  ;  \n").is_empty());
    }

    #[test]
    fn multiline_statement_keeps_interior_newlines() {
        let input = "CREATE TABLE users (\n    id uuid PRIMARY KEY,\n    name text\n);\n";
        assert_eq!(
            split_statements(input),
            vec!["CREATE TABLE users (\n    id uuid PRIMARY KEY,\n    name text\n)"]
        );
    }

    #[test]
    fn final_statement_without_semicolon_is_emitted() {
        assert_eq!(
            split_statements("CREATE TABLE a;\nCREATE TABLE b"),
            vec!["CREATE TABLE a", "CREATE TABLE b"]
        );
    }

    #[test]
    fn only_one_trailing_semicolon_is_stripped() {
        assert_eq!(split_statements("DROP TABLE a;;"), vec!["DROP TABLE a;"]);
    }

    #[test]
    fn inline_trailing_comment_rides_along() {
        // The trimmed line ends with the comment, not with `;`, so the line
        // does not terminate the statement and the comment text is kept.
        let input = "CREATE TABLE x; -- note\nDROP TABLE y;";
        assert_eq!(
            split_statements(input),
            vec!["CREATE TABLE x; -- note\nDROP TABLE y"]
        );
    }

    #[test]
    fn semicolons_inside_a_line_do_not_split() {
        assert_eq!(
            split_statements("CREATE TABLE a; CREATE TABLE b;"),
            vec!["CREATE TABLE a; CREATE TABLE b"]
        );
    }

    #[test]
    fn indented_comment_lines_are_stripped() {
        let input = "   -- indented comment\nCREATE TABLE a;";
        assert_eq!(split_statements(input), vec!["CREATE TABLE a"]);
    }

    #[test]
    fn rejoined_output_splits_to_the_same_statements() {
        let input = "-- header\nCREATE TABLE a;\nCREATE INDEX i ON a(x);\nDROP TABLE b";
        let first = split_statements(input);
        let rejoined = first
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(split_statements(&rejoined), first);
    }
}
