use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Number(usize),
    Name(String),
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Number(index) => write!(f, "#{index}"),
            Column::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeListFormat {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<char>,
    #[serde(default)]
    pub header: bool,
    pub sources: Column,
    pub destinations: Column,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_types: Option<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_symbol: Option<String>,
    #[serde(default)]
    pub rows_to_skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_edge_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_weight: Option<f64>,
}

impl EdgeListFormat {
    pub fn new(path: impl Into<String>, sources: Column, destinations: Column) -> Self {
        Self {
            path: path.into(),
            separator: None,
            header: false,
            sources,
            destinations,
            edge_types: None,
            weights: None,
            comment_symbol: None,
            rows_to_skip: 0,
            default_edge_type: None,
            default_weight: None,
        }
    }

    pub fn has_edge_types(&self) -> bool {
        self.edge_types.is_some() || self.default_edge_type.is_some()
    }

    pub fn has_weights(&self) -> bool {
        self.weights.is_some() || self.default_weight.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeListFormat {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<char>,
    #[serde(default)]
    pub header: bool,
    pub nodes: Column,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_types: Option<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_types_separator: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_symbol: Option<String>,
    #[serde(default)]
    pub rows_to_skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_node_type: Option<String>,
}

impl NodeListFormat {
    pub fn new(path: impl Into<String>, nodes: Column) -> Self {
        Self {
            path: path.into(),
            separator: None,
            header: false,
            nodes,
            node_types: None,
            node_types_separator: None,
            comment_symbol: None,
            rows_to_skip: 0,
            default_node_type: None,
        }
    }

    pub fn has_node_types(&self) -> bool {
        self.node_types.is_some() || self.default_node_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFormat {
    pub edges: EdgeListFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeListFormat>,
}

impl GraphFormat {
    pub fn edges_only(edges: EdgeListFormat) -> Self {
        Self { edges, nodes: None }
    }

    pub fn with_nodes(mut self, nodes: NodeListFormat) -> Self {
        self.nodes = Some(nodes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_accepts_names_and_numbers() {
        let format: EdgeListFormat = serde_json::from_str(
            r#"{"path": "edges.tsv", "header": true, "sources": "protein1", "destinations": 1}"#,
        )
        .unwrap();
        assert_eq!(format.sources, Column::Name("protein1".to_string()));
        assert_eq!(format.destinations, Column::Number(1));
        assert!(!format.has_weights());
    }
}
