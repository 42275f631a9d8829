use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Color as CtColor, Stylize};
use unicode_width::UnicodeWidthStr;

// ═══════════════════════════════════════════════════════════════════════════════
// Clap Styles
// ═══════════════════════════════════════════════════════════════════════════════

fn ansi(color: AnsiColor) -> Option<Color> {
    Some(Color::Ansi(color))
}

pub fn get_styles() -> Styles {
    Styles::styled()
        .usage(Style::new().bold().underline().fg_color(ansi(AnsiColor::Yellow)))
        .header(Style::new().bold().underline().fg_color(ansi(AnsiColor::Yellow)))
        .literal(Style::new().bold().fg_color(ansi(AnsiColor::Green)))
        .invalid(Style::new().bold().fg_color(ansi(AnsiColor::Red)))
        .error(Style::new().bold().fg_color(ansi(AnsiColor::Red)))
        .valid(Style::new().bold().fg_color(ansi(AnsiColor::Green)))
        .placeholder(Style::new().fg_color(ansi(AnsiColor::BrightBlack)))
}

mod colors {
    use crossterm::style::Color;

    pub const ACCENT: Color = Color::Rgb { r: 255, g: 196, b: 0 };
    pub const GOOD: Color = Color::Rgb { r: 0, g: 215, b: 135 };
    pub const WARN: Color = Color::Rgb { r: 255, g: 140, b: 0 };
    pub const BAD: Color = Color::Rgb { r: 255, g: 85, b: 85 };
    pub const DIM: Color = Color::Rgb { r: 128, g: 128, b: 128 };
    pub const TEXT: Color = Color::Rgb { r: 235, g: 235, b: 235 };
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status Lines
// ═══════════════════════════════════════════════════════════════════════════════

fn print_status(mark: &str, color: CtColor, message: &str) {
    println!(" {} {}", mark.with(color).bold(), message.with(color));
}

pub fn print_success(message: &str) {
    print_status("✓", colors::GOOD, message);
}

pub fn print_warning(message: &str) {
    eprintln!(" {} {}", "⚠".with(colors::WARN).bold(), message.with(colors::WARN));
}

pub fn print_error(message: &str) {
    eprintln!(" {} {}", "✗".with(colors::BAD).bold(), message.with(colors::BAD));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════════

const SECTION_WIDTH: usize = 48;

pub fn print_section_header(title: &str) {
    let rule = "─".repeat(SECTION_WIDTH.saturating_sub(title.width() + 3));
    println!();
    println!(
        "{} {} {}",
        "─".with(colors::ACCENT),
        title.with(colors::ACCENT).bold(),
        rule.with(colors::ACCENT)
    );
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {}",
        format!("{}:", key).with(colors::DIM),
        value.with(colors::TEXT)
    );
}

pub fn print_empty_list(message: &str) {
    println!("  {}", message.with(colors::DIM).italic());
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════════════════

/// Column-aligned rows with a bold header, sized by display width.
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    col_widths: Vec<usize>,
}

impl TableBuilder {
    pub fn new(headers: &[&str]) -> Self {
        TableBuilder {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            col_widths: headers.iter().map(|h| h.width()).collect(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        for (width, cell) in self.col_widths.iter_mut().zip(&row) {
            *width = (*width).max(cell.width());
        }
        self.rows.push(row);
    }

    fn padded(&self, column: usize, cell: &str) -> String {
        let width = self.col_widths.get(column).copied().unwrap_or(0);
        format!("{}{}", cell, " ".repeat(width.saturating_sub(cell.width())))
    }

    pub fn print(&self) {
        let header: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| self.padded(i, h))
            .collect();
        println!("  {}", header.join("  ").with(colors::ACCENT).bold());

        let total: usize = self.col_widths.iter().sum::<usize>()
            + 2 * self.col_widths.len().saturating_sub(1);
        println!("  {}", "─".repeat(total).with(colors::DIM));

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| self.padded(i, cell))
                .collect();
            println!("  {}", cells.join("  ").with(colors::TEXT));
        }
    }
}
