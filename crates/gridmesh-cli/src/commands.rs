//! Interactive edit commands, one per input line.
//!
//! Rows and columns are zero-based everywhere.

use gridmesh_types::{Position, Selection};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: {0}")]
    Number(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { row: usize, col: usize, value: String },
    InsertRow { index: usize, values: Option<Vec<String>> },
    DeleteRow { index: usize, count: usize },
    MoveRow { from: usize, to: usize },
    InsertColumn { index: usize, values: Option<Vec<String>> },
    DeleteColumn { index: usize, count: usize },
    MoveColumn { from: usize, to: usize },
    Sheet(usize),
    Select(Option<Position>),
    Undo,
    Redo,
    Show,
    Peers,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  set <row> <col> <value...>       set one cell
  insert-row <index> [v1,v2,...]   insert a row (optionally with values)
  delete-row <index> [count]       delete rows
  move-row <from> <to>             move a row
  insert-col <index> [v1,v2,...]   insert a column
  delete-col <index> [count]       delete columns
  move-col <from> <to>             move a column
  sheet <index>                    switch the active sheet
  select <col> <row> [col2 row2]   publish a selection (`select none` clears)
  undo | redo                      step through local history
  show | peers                     print the grid or the peer list
  quit";

fn number(token: Option<&str>, usage: &'static str) -> Result<usize, ParseError> {
    let token = token.ok_or(ParseError::Usage(usage))?;
    token.parse().map_err(|_| ParseError::Number(token.to_string()))
}

fn values(token: Option<&str>) -> Option<Vec<String>> {
    token.map(|list| list.split(',').map(|v| v.trim().to_string()).collect())
}

/// Parse one input line. Empty lines yield `Ok(None)`.
pub fn parse(line: &str, sheet_idx: usize) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "set" => {
            const USAGE: &str = "set <row> <col> <value...>";
            let row = number(words.next(), USAGE)?;
            let col = number(words.next(), USAGE)?;
            let value = words.collect::<Vec<_>>().join(" ");
            Command::Set { row, col, value }
        }
        "insert-row" => Command::InsertRow {
            index: number(words.next(), "insert-row <index> [values]")?,
            values: values(words.next()),
        },
        "delete-row" => Command::DeleteRow {
            index: number(words.next(), "delete-row <index> [count]")?,
            count: words.next().map_or(Ok(1), |c| number(Some(c), "delete-row <index> [count]"))?,
        },
        "move-row" => Command::MoveRow {
            from: number(words.next(), "move-row <from> <to>")?,
            to: number(words.next(), "move-row <from> <to>")?,
        },
        "insert-col" => Command::InsertColumn {
            index: number(words.next(), "insert-col <index> [values]")?,
            values: values(words.next()),
        },
        "delete-col" => Command::DeleteColumn {
            index: number(words.next(), "delete-col <index> [count]")?,
            count: words.next().map_or(Ok(1), |c| number(Some(c), "delete-col <index> [count]"))?,
        },
        "move-col" => Command::MoveColumn {
            from: number(words.next(), "move-col <from> <to>")?,
            to: number(words.next(), "move-col <from> <to>")?,
        },
        "sheet" => Command::Sheet(number(words.next(), "sheet <index>")?),
        "select" => {
            const USAGE: &str = "select <col> <row> [col2 row2] | select none";
            let rest: Vec<&str> = words.collect();
            match rest.as_slice() {
                ["none"] => Command::Select(None),
                [x, y] => {
                    let (x, y) = (number(Some(*x), USAGE)? as u32, number(Some(*y), USAGE)? as u32);
                    Command::Select(Some(Position { sheet_idx, selection: Selection::cell(x, y) }))
                }
                [x1, y1, x2, y2] => {
                    let selection = Selection {
                        x1: number(Some(*x1), USAGE)? as u32,
                        y1: number(Some(*y1), USAGE)? as u32,
                        x2: number(Some(*x2), USAGE)? as u32,
                        y2: number(Some(*y2), USAGE)? as u32,
                    };
                    Command::Select(Some(Position { sheet_idx, selection }))
                }
                _ => return Err(ParseError::Usage(USAGE)),
            }
        }
        "undo" => Command::Undo,
        "redo" => Command::Redo,
        "show" | "ls" => Command::Show,
        "peers" => Command::Peers,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
