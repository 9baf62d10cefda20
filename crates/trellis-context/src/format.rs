//! Output rendering: a pure presentation transform over a computed
//! `ContextResult`. Never touches token accounting.

use std::str::FromStr;

use trellis_core::Error;

use crate::engine::{ContextNode, ContextResult};

/// Supported renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Plain,
    Markdown,
    Structured,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(OutputFormat::Plain),
            "markdown" => Ok(OutputFormat::Markdown),
            "structured" | "json" => Ok(OutputFormat::Structured),
            other => Err(Error::InvalidArgument(format!("unknown format: {other}"))),
        }
    }
}

/// Render a result in the requested format.
pub fn render(result: &ContextResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Plain => render_plain(result),
        OutputFormat::Markdown => render_markdown(result),
        OutputFormat::Structured => {
            serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
        }
    }
}

fn location(node: &ContextNode) -> String {
    match node.line_range {
        Some((start, end)) => format!("{}:{}-{}", node.path.display(), start, end),
        None => node.path.display().to_string(),
    }
}

fn render_plain(result: &ContextResult) -> String {
    let mut out = String::new();
    for node in &result.nodes {
        out.push_str(&format!(
            "=== {} ({}) [{}]\n",
            node.fqn,
            location(node),
            node.level
        ));
        if !node.text.is_empty() {
            out.push_str(&node.text);
            if !node.text.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "{} included, {} excluded, {} truncated | {} tokens ({:.1}% of budget) | strategy {} | graph v{}\n",
        result.nodes_included,
        result.nodes_excluded,
        result.nodes_truncated,
        result.total_tokens,
        result.budget_used_pct,
        result.strategy_used,
        result.graph_version,
    ));
    out
}

fn render_markdown(result: &ContextResult) -> String {
    let mut out = String::from("# Assembled context\n\n");
    for node in &result.nodes {
        out.push_str(&format!("## `{}`\n\n", node.fqn));
        out.push_str(&format!("{} ({} level)\n\n", location(node), node.level));
        if !node.text.is_empty() {
            out.push_str("```\n");
            out.push_str(&node.text);
            if !node.text.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n\n");
        }
    }
    out.push_str(&format!(
        "*{} nodes, {} tokens, {:.1}% of budget, strategy {}, graph v{}*\n",
        result.nodes_included,
        result.total_tokens,
        result.budget_used_pct,
        result.strategy_used,
        result.graph_version,
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Strategy;
    use crate::summarize::DetailLevel;
    use std::path::PathBuf;
    use trellis_core::NodeKind;

    fn result() -> ContextResult {
        ContextResult {
            nodes: vec![ContextNode {
                fqn: "app::main".into(),
                kind: NodeKind::Function,
                path: PathBuf::from("src/app.py"),
                line_range: Some((3, 9)),
                structural_score: 1.0,
                semantic_score: 0.4,
                combined_score: 0.64,
                level: DetailLevel::Full,
                token_count: 6,
                text: "def main():\n    run()".into(),
            }],
            total_tokens: 6,
            budget_used_pct: 1.2,
            nodes_included: 1,
            nodes_excluded: 0,
            nodes_truncated: 0,
            strategy_used: Strategy::Greedy,
            graph_version: 7,
            generation_time_ms: 2,
        }
    }

    #[test]
    fn plain_keeps_location_at_every_level() {
        let mut res = result();
        res.nodes[0].level = DetailLevel::Reference;
        res.nodes[0].text = String::new();
        let text = render(&res, OutputFormat::Plain);
        assert!(text.contains("src/app.py:3-9"));
        assert!(text.contains("[reference]"));
    }

    #[test]
    fn markdown_fences_the_body() {
        let text = render(&result(), OutputFormat::Markdown);
        assert!(text.contains("## `app::main`"));
        assert!(text.contains("```\ndef main():"));
        assert!(text.contains("graph v7"));
    }

    #[test]
    fn structured_is_valid_json() {
        let text = render(&result(), OutputFormat::Structured);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["total_tokens"], 6);
        assert_eq!(value["nodes"][0]["fqn"], "app::main");
    }

    #[test]
    fn format_parsing_rejects_unknown_names() {
        assert!("plain".parse::<OutputFormat>().is_ok());
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn rendering_does_not_change_totals() {
        let res = result();
        let before = res.total_tokens;
        let _ = render(&res, OutputFormat::Plain);
        let _ = render(&res, OutputFormat::Markdown);
        assert_eq!(res.total_tokens, before);
    }
}
