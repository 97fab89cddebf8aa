use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print left-aligned columns, each as wide as its widest cell.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    for line in table_lines(headers, &rows) {
        println!("{line}");
    }
}

fn table_lines(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .fold(h.len(), usize::max)
        })
        .collect();

    let join = |cells: Vec<String>| cells.join("  ").trim_end().to_string();
    let pad = |i: usize, cell: &str| format!("{cell:<width$}", width = widths[i]);

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(join(headers.iter().enumerate().map(|(i, h)| pad(i, h)).collect()));
    lines.push(join(widths.iter().map(|w| "-".repeat(*w)).collect()));
    for row in rows {
        lines.push(join(
            row.iter()
                .take(widths.len())
                .enumerate()
                .map(|(i, cell)| pad(i, cell))
                .collect(),
        ));
    }
    lines
}
