//! Per-hop table rendering.

use std::fmt::Write;

use super::parser::Hop;

/// Render hops as a fixed-width table.
pub fn render_table(hops: &[Hop]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>3}  {:<15}  {:>8}  {:>8}  {:>8}  {:>5}",
        "Hop", "Address", "Min(ms)", "Avg(ms)", "Max(ms)", "Loss"
    );

    for hop in hops {
        let address = hop
            .address
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "*".to_string());
        let _ = writeln!(
            out,
            "{:>3}  {:<15}  {:>8}  {:>8}  {:>8}  {:>4.0}%",
            hop.index,
            address,
            cell(hop.min()),
            cell(hop.avg()),
            cell(hop.max()),
            hop.loss_percent()
        );
    }
    out
}

fn cell(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parser::parse_line;

    #[test]
    fn test_render_table() {
        let hops = vec![
            parse_line(" 1  192.168.1.1  0.5 ms  0.4 ms  0.3 ms").unwrap(),
            parse_line(" 2  * * *").unwrap(),
        ];
        let table = render_table(&hops);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Hop  Address"));
        assert_eq!(
            lines[1],
            "  1  192.168.1.1          0.30      0.40      0.50     0%"
        );
        assert_eq!(
            lines[2],
            "  2  *                       -         -         -   100%"
        );
    }
}
