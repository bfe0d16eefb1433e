//! Terminal colours, applied only when stdout is a TTY.

use std::io::IsTerminal;

use owo_colors::{OwoColorize, Style};

fn paint(text: impl AsRef<str>, style: Style) -> String {
    let text = text.as_ref();
    if std::io::stdout().is_terminal() {
        text.style(style).to_string()
    } else {
        text.to_string()
    }
}

pub fn success(text: impl AsRef<str>) -> String {
    paint(text, Style::new().green())
}

pub fn warning(text: impl AsRef<str>) -> String {
    paint(text, Style::new().yellow().bold())
}

pub fn error(text: impl AsRef<str>) -> String {
    paint(text, Style::new().red())
}

pub fn accent(text: impl AsRef<str>) -> String {
    paint(text, Style::new().cyan())
}

pub fn dim(text: impl AsRef<str>) -> String {
    paint(text, Style::new().dimmed())
}
