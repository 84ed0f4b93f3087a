use console::{Term, measure_text_width, style};

const COLORS: [fn(&str) -> console::StyledObject<&str>; 5] = [
    |s| style(s).yellow(),
    |s| style(s).green(),
    |s| style(s).cyan(),
    |s| style(s).magenta(),
    |s| style(s).blue(),
];

fn truncate(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        return cell.to_string();
    }
    if width > 3 {
        let kept: String = cell.chars().take(width - 3).collect();
        format!("{kept}...")
    } else {
        cell.chars().take(width).collect()
    }
}

/// Column widths that fit `max_width`, shrinking proportionally with a floor of 4.
fn column_widths(headers: &[String], content: &[Vec<String>], max_width: usize) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in content {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let separators = (widths.len().saturating_sub(1)) * 2;
    let total: usize = widths.iter().sum::<usize>() + separators;
    if total > max_width.saturating_sub(4) {
        let available = max_width.saturating_sub(4 + separators);
        let scale = available as f64 / widths.iter().sum::<usize>().max(1) as f64;
        for width in &mut widths {
            *width = ((*width as f64 * scale) as usize).max(4);
        }
    }
    widths
}

fn pad(text: String, width: usize) -> String {
    let visible = measure_text_width(&text);
    format!("{text}{}", " ".repeat(width.saturating_sub(visible)))
}

pub fn render_table(
    title: &str,
    headers: &[String],
    content: &[Vec<String>],
    max_width: usize,
) -> Vec<String> {
    let widths = column_widths(headers, content, max_width);
    let content_width = widths.iter().sum::<usize>() + widths.len().saturating_sub(1) * 2;

    let mut lines = vec![
        style(title).bold().to_string(),
        "━".repeat(measure_text_width(title).max(content_width)),
    ];
    lines.push(
        headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| pad(style(truncate(h, *w)).bold().cyan().to_string(), *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string(),
    );
    lines.push("-".repeat(content_width));
    for row in content {
        let line = row
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, w))| {
                let cell = truncate(cell, *w);
                pad(COLORS[i % COLORS.len()](&cell).to_string(), *w)
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(line.trim_end().to_string());
    }
    lines
}

pub fn draw_table(title: String, headers: Vec<String>, content: Vec<Vec<String>>) {
    if content.is_empty() {
        println!("{} Nothing recorded yet.", style("ℹ️").dim());
        return;
    }
    let terminal_width = Term::stdout().size().1 as usize;
    let max_width = if terminal_width > 10 { terminal_width } else { 80 };
    for line in render_table(&title, &headers, &content, max_width) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_cells_are_truncated_to_fit() {
        console::set_colors_enabled(false);
        let headers = vec!["ADDRESS".to_string(), "ID".to_string()];
        let content = vec![vec!["service.".to_string() + &"x".repeat(80), "svc-1".to_string()]];
        let lines = render_table("Resources", &headers, &content, 40);
        assert!(lines.iter().all(|l| measure_text_width(l) <= 40));
        assert!(lines[4].contains("..."));
    }

    #[test]
    fn short_tables_keep_full_text() {
        console::set_colors_enabled(false);
        let headers = vec!["ADDRESS".to_string(), "ID".to_string()];
        let content = vec![vec!["network.airtek-vpc".to_string(), "vpc-1a2b".to_string()]];
        let lines = render_table("Resources", &headers, &content, 120);
        assert_eq!(lines[4], "network.airtek-vpc  vpc-1a2b");
    }
}
