use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{DatasetName, RepositoryName, Version};
use crate::format::GraphFormat;
use crate::preprocess::{
    NODE_TYPES_SEPARATOR, PreprocessOptions, Preprocessor, ProcessedFiles,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("graph assembly failed: {message}")]
pub struct AssemblyError {
    pub message: String,
}

impl AssemblyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphSource {
    Preprocessed(ProcessedFiles),
    Raw {
        root: Utf8PathBuf,
        files: Vec<Utf8PathBuf>,
        format: GraphFormat,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblyRequest<'a> {
    pub repository: &'a RepositoryName,
    pub name: &'a DatasetName,
    pub version: &'a Version,
    pub options: PreprocessOptions,
    pub source: &'a GraphSource,
    pub extra: &'a BTreeMap<String, Value>,
}

pub trait GraphAssembler {
    type Graph;

    fn assemble(&self, request: AssemblyRequest<'_>) -> Result<Self::Graph, AssemblyError>;
}

impl<T: GraphAssembler + ?Sized> GraphAssembler for &T {
    type Graph = T::Graph;

    fn assemble(&self, request: AssemblyRequest<'_>) -> Result<Self::Graph, AssemblyError> {
        (**self).assemble(request)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub name: String,
    pub repository: String,
    pub version: String,
    pub directed: bool,
    pub nodes: u64,
    pub edges: u64,
    pub node_types: Option<u64>,
    pub edge_types: Option<u64>,
    pub has_weights: bool,
    pub preprocessed: bool,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryAssembler;

impl GraphAssembler for SummaryAssembler {
    type Graph = GraphSummary;

    fn assemble(&self, request: AssemblyRequest<'_>) -> Result<GraphSummary, AssemblyError> {
        let counts = match request.source {
            GraphSource::Preprocessed(files) => summarize_processed(files)?,
            GraphSource::Raw { root, format, .. } => summarize_raw(root, format, &request)?,
        };
        Ok(GraphSummary {
            name: request.name.to_string(),
            repository: request.repository.to_string(),
            version: request.version.to_string(),
            directed: request.options.directed,
            nodes: counts.nodes,
            edges: counts.edges,
            node_types: counts.node_types,
            edge_types: counts.edge_types,
            has_weights: counts.has_weights,
            preprocessed: matches!(request.source, GraphSource::Preprocessed(_)),
            extra: request.extra.clone(),
        })
    }
}

struct Counts {
    nodes: u64,
    edges: u64,
    node_types: Option<u64>,
    edge_types: Option<u64>,
    has_weights: bool,
}

fn summarize_raw(
    root: &Utf8Path,
    format: &GraphFormat,
    request: &AssemblyRequest<'_>,
) -> Result<Counts, AssemblyError> {
    let raw = Preprocessor::parse(root, format).map_err(|err| AssemblyError::new(err.to_string()))?;
    let graph = Preprocessor::build(raw, request.options);
    let metadata = graph.metadata();
    Ok(Counts {
        nodes: metadata.nodes_number,
        edges: metadata.edges_number,
        node_types: metadata.node_types_number,
        edge_types: metadata.edge_types_number,
        has_weights: metadata.has_weights,
    })
}

fn summarize_processed(files: &ProcessedFiles) -> Result<Counts, AssemblyError> {
    let metadata = &files.metadata;
    let node_types = match &files.node_types {
        Some(path) => Some(count_lines(path)?),
        None => None,
    };
    let edge_types = match &files.edge_types {
        Some(path) => Some(count_lines(path)?),
        None => None,
    };
    if node_types != metadata.node_types_number {
        return Err(AssemblyError::new(format!(
            "{}: {node_types:?} node types listed, metadata declares {:?}",
            files.dir, metadata.node_types_number
        )));
    }
    if edge_types != metadata.edge_types_number {
        return Err(AssemblyError::new(format!(
            "{}: {edge_types:?} edge types listed, metadata declares {:?}",
            files.dir, metadata.edge_types_number
        )));
    }

    if let Some(path) = &files.nodes {
        let content = read(path)?;
        let mut count = 0u64;
        for (index, line) in content.lines().enumerate() {
            count += 1;
            if line.is_empty() {
                return Err(schema(path, index, "empty node name"));
            }
            if let Some(limit) = node_types {
                let mut columns = line.split('\t');
                let _name = columns.next();
                let types = columns.next().unwrap_or("");
                for node_type in types.split(NODE_TYPES_SEPARATOR).filter(|t| !t.is_empty()) {
                    check_id(path, index, node_type, limit, "node type")?;
                }
            }
        }
        if count != metadata.nodes_number {
            return Err(AssemblyError::new(format!(
                "{path}: {count} nodes listed, metadata declares {}",
                metadata.nodes_number
            )));
        }
    }

    let expected_columns = 2
        + usize::from(metadata.edge_types_number.is_some())
        + usize::from(metadata.has_weights);
    let content = read(&files.edges)?;
    let mut edges = 0u64;
    for (index, line) in content.lines().enumerate() {
        edges += 1;
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != expected_columns {
            return Err(schema(
                &files.edges,
                index,
                format!("expected {expected_columns} columns, found {}", columns.len()),
            ));
        }
        check_id(&files.edges, index, columns[0], metadata.nodes_number, "source")?;
        check_id(&files.edges, index, columns[1], metadata.nodes_number, "destination")?;
        let mut next = 2;
        if let Some(limit) = edge_types {
            if !columns[next].is_empty() {
                check_id(&files.edges, index, columns[next], limit, "edge type")?;
            }
            next += 1;
        }
        if metadata.has_weights
            && !columns[next].is_empty()
            && columns[next].parse::<f64>().is_err()
        {
            return Err(schema(&files.edges, index, "weight is not a number"));
        }
    }
    if edges != metadata.edges_number {
        return Err(AssemblyError::new(format!(
            "{}: {edges} edges listed, metadata declares {}",
            files.edges, metadata.edges_number
        )));
    }

    Ok(Counts {
        nodes: metadata.nodes_number,
        edges,
        node_types,
        edge_types,
        has_weights: metadata.has_weights,
    })
}

fn read(path: &Utf8Path) -> Result<String, AssemblyError> {
    fs::read_to_string(path.as_std_path())
        .map_err(|err| AssemblyError::new(format!("read {path}: {err}")))
}

fn count_lines(path: &Utf8Path) -> Result<u64, AssemblyError> {
    Ok(read(path)?.lines().count() as u64)
}

fn check_id(
    path: &Utf8Path,
    index: usize,
    value: &str,
    limit: u64,
    what: &str,
) -> Result<(), AssemblyError> {
    match value.parse::<u64>() {
        Ok(id) if id < limit => Ok(()),
        _ => Err(schema(
            path,
            index,
            format!("{what} id '{value}' outside 0..{limit}"),
        )),
    }
}

fn schema(path: &Utf8Path, index: usize, message: impl std::fmt::Display) -> AssemblyError {
    AssemblyError::new(format!("{path} line {}: {message}", index + 1))
}
