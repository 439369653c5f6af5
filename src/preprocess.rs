use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::BufRead;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, info};

use crate::domain::DatasetDescriptor;
use crate::download::Deadline;
use crate::error::RetrievalError;
use crate::format::{Column, EdgeListFormat, GraphFormat, NodeListFormat};
use crate::fs_util::open_maybe_gz;
use crate::integrity::{FileRecord, is_complete_at, mark_complete_at};
use crate::store::{CacheEntry, atomic_rename_dir, ensure_dir};

pub const EDGES_FILE: &str = "edges.tsv";
pub const NODES_FILE: &str = "nodes.tsv";
pub const NODE_TYPES_FILE: &str = "node_types.tsv";
pub const EDGE_TYPES_FILE: &str = "edge_types.tsv";
pub const METADATA_FILE: &str = "metadata.json";

pub const NODE_TYPES_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub directed: bool,
    pub load_nodes: bool,
    pub load_node_types: bool,
    pub load_edge_types: bool,
    pub load_edge_weights: bool,
}

impl PreprocessOptions {
    pub const fn new(directed: bool) -> Self {
        Self {
            directed,
            load_nodes: true,
            load_node_types: true,
            load_edge_types: true,
            load_edge_weights: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessMetadata {
    pub nodes_number: u64,
    pub node_types_number: Option<u64>,
    pub edges_number: u64,
    pub edge_types_number: Option<u64>,
    pub has_weights: bool,
    pub directed: bool,
    pub load_nodes: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFiles {
    pub dir: Utf8PathBuf,
    pub edges: Utf8PathBuf,
    pub nodes: Option<Utf8PathBuf>,
    pub node_types: Option<Utf8PathBuf>,
    pub edge_types: Option<Utf8PathBuf>,
    pub metadata_path: Utf8PathBuf,
    pub metadata: PreprocessMetadata,
}

impl ProcessedFiles {
    fn in_dir(dir: &Utf8Path, metadata: PreprocessMetadata) -> Self {
        Self {
            dir: dir.to_path_buf(),
            edges: dir.join(EDGES_FILE),
            nodes: metadata.load_nodes.then(|| dir.join(NODES_FILE)),
            node_types: metadata
                .node_types_number
                .is_some()
                .then(|| dir.join(NODE_TYPES_FILE)),
            edge_types: metadata
                .edge_types_number
                .is_some()
                .then(|| dir.join(EDGE_TYPES_FILE)),
            metadata_path: dir.join(METADATA_FILE),
            metadata,
        }
    }

    pub fn load(dir: &Utf8Path) -> Result<Self, RetrievalError> {
        let path = dir.join(METADATA_FILE);
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| RetrievalError::Filesystem(format!("read {path}: {err}")))?;
        let metadata: PreprocessMetadata = serde_json::from_str(&content)
            .map_err(|err| RetrievalError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Self::in_dir(dir, metadata))
    }

    pub fn file_names(&self) -> Vec<&'static str> {
        let mut names = vec![EDGES_FILE];
        if self.nodes.is_some() {
            names.push(NODES_FILE);
        }
        if self.node_types.is_some() {
            names.push(NODE_TYPES_FILE);
        }
        if self.edge_types.is_some() {
            names.push(EDGE_TYPES_FILE);
        }
        names.push(METADATA_FILE);
        names
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub source: String,
    pub destination: String,
    pub edge_type: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGraph {
    pub edges: Vec<RawEdge>,
    pub nodes: Vec<RawNode>,
    pub has_edge_types: bool,
    pub has_weights: bool,
    pub has_node_types: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedEdge {
    pub source: usize,
    pub destination: usize,
    pub edge_type: Option<usize>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedGraph {
    pub nodes: Vec<String>,
    pub node_type_ids: Vec<Vec<usize>>,
    pub node_types: Vec<String>,
    pub edge_types: Vec<String>,
    pub edges: Vec<ProcessedEdge>,
    pub has_node_types: bool,
    pub has_edge_types: bool,
    pub has_weights: bool,
    pub options: PreprocessOptions,
}

impl ProcessedGraph {
    pub fn metadata(&self) -> PreprocessMetadata {
        let keep_node_types = self.has_node_types && self.options.load_nodes;
        PreprocessMetadata {
            nodes_number: self.nodes.len() as u64,
            node_types_number: keep_node_types.then_some(self.node_types.len() as u64),
            edges_number: self.edges.len() as u64,
            edge_types_number: self
                .has_edge_types
                .then_some(self.edge_types.len() as u64),
            has_weights: self.has_weights,
            directed: self.options.directed,
            load_nodes: self.options.load_nodes,
        }
    }
}

/// Digest of the raw format and of every option except directedness, which
/// already splits variants by directory.
pub fn variant_key(format: &GraphFormat, options: &PreprocessOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(format).unwrap_or_default());
    hasher.update([
        u8::from(options.load_nodes),
        u8::from(options.load_node_types),
        u8::from(options.load_edge_types),
        u8::from(options.load_edge_weights),
    ]);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

pub struct Preprocessor;

impl Preprocessor {
    pub fn preprocess(
        entry: &CacheEntry,
        descriptor: &DatasetDescriptor,
        options: PreprocessOptions,
        deadline: &Deadline,
    ) -> Result<ProcessedFiles, RetrievalError> {
        let dir = Self::variant_dir(entry, descriptor, &options);
        if let Some(files) = Self::completed(&dir) {
            debug!(dir = %dir, "preprocessed variant already complete");
            return Ok(files);
        }

        let raw = Self::parse(entry.dir(), descriptor.format())?;
        deadline.check("preprocess")?;
        let graph = Self::build(raw, options);
        deadline.check("preprocess")?;

        let parent = dir
            .parent()
            .ok_or_else(|| RetrievalError::path(&dir, "no parent directory"))?;
        ensure_dir(parent)?;
        let staging = Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| RetrievalError::path(parent, err))?;
        let staging_dir = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
            .map_err(|path| RetrievalError::path(path.display(), "not valid UTF-8"))?;

        let records = Self::write(&graph, &staging_dir)?;
        mark_complete_at(&staging_dir, descriptor, records)?;
        deadline.check("preprocess")?;

        let staged = staging.keep();
        if let Err(err) = atomic_rename_dir(&staged, dir.as_std_path()) {
            let _ = fs::remove_dir_all(&staged);
            return Err(RetrievalError::path(&dir, err));
        }
        let metadata = graph.metadata();
        info!(
            dir = %dir,
            nodes = metadata.nodes_number,
            edges = metadata.edges_number,
            "preprocessed"
        );
        Ok(ProcessedFiles::in_dir(&dir, metadata))
    }

    pub fn variant_dir(
        entry: &CacheEntry,
        descriptor: &DatasetDescriptor,
        options: &PreprocessOptions,
    ) -> Utf8PathBuf {
        entry.processed_dir(options.directed, &variant_key(descriptor.format(), options))
    }

    pub fn completed(dir: &Utf8Path) -> Option<ProcessedFiles> {
        let files = ProcessedFiles::load(dir).ok()?;
        is_complete_at(dir, &files.file_names()).then_some(files)
    }

    pub fn parse(root: &Utf8Path, format: &GraphFormat) -> Result<RawGraph, RetrievalError> {
        let mut graph = RawGraph {
            has_edge_types: format.edges.has_edge_types(),
            has_weights: format.edges.has_weights(),
            ..RawGraph::default()
        };
        graph.edges = read_edges(&root.join(&format.edges.path), &format.edges)?;
        if let Some(nodes) = &format.nodes {
            graph.has_node_types = nodes.has_node_types();
            graph.nodes = read_nodes(&root.join(&nodes.path), nodes)?;
        }
        Ok(graph)
    }

    /// Assigns ids and normalises edges. Node ids follow sorted name order,
    /// numeric when every name is an integer; type ids follow sorted names.
    pub fn build(mut raw: RawGraph, options: PreprocessOptions) -> ProcessedGraph {
        if !options.load_node_types {
            raw.has_node_types = false;
            raw.nodes.iter_mut().for_each(|node| node.types.clear());
        }
        if !options.load_edge_types {
            raw.has_edge_types = false;
            raw.edges.iter_mut().for_each(|edge| edge.edge_type = None);
        }
        if !options.load_edge_weights {
            raw.has_weights = false;
            raw.edges.iter_mut().for_each(|edge| edge.weight = None);
        }
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for node in &raw.nodes {
            names.insert(&node.name);
        }
        for edge in &raw.edges {
            names.insert(&edge.source);
            names.insert(&edge.destination);
        }
        let mut nodes: Vec<String> = names.into_iter().map(str::to_string).collect();
        if nodes.iter().all(|name| name.parse::<u64>().is_ok()) {
            nodes.sort_by(|a, b| {
                let left = a.parse::<u64>().unwrap_or(u64::MAX);
                let right = b.parse::<u64>().unwrap_or(u64::MAX);
                left.cmp(&right).then_with(|| a.cmp(b))
            });
        }
        let node_ids: BTreeMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id))
            .collect();

        let node_types: Vec<String> = raw
            .nodes
            .iter()
            .flat_map(|node| node.types.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let node_type_index: BTreeMap<&str, usize> = node_types
            .iter()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id))
            .collect();
        let mut node_type_ids = vec![Vec::new(); nodes.len()];
        for node in &raw.nodes {
            let slot = &mut node_type_ids[node_ids[node.name.as_str()]];
            for node_type in &node.types {
                slot.push(node_type_index[node_type.as_str()]);
            }
        }
        for types in &mut node_type_ids {
            types.sort_unstable();
            types.dedup();
        }

        let edge_types: Vec<String> = raw
            .edges
            .iter()
            .filter_map(|edge| edge.edge_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let edge_type_index: BTreeMap<&str, usize> = edge_types
            .iter()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id))
            .collect();

        let mut edges = Vec::with_capacity(raw.edges.len() * if options.directed { 1 } else { 2 });
        for edge in &raw.edges {
            let forward = ProcessedEdge {
                source: node_ids[edge.source.as_str()],
                destination: node_ids[edge.destination.as_str()],
                edge_type: edge
                    .edge_type
                    .as_deref()
                    .map(|name| edge_type_index[name]),
                weight: edge.weight,
            };
            edges.push(forward);
            if !options.directed && forward.source != forward.destination {
                edges.push(ProcessedEdge {
                    source: forward.destination,
                    destination: forward.source,
                    ..forward
                });
            }
        }
        edges.sort_by_key(|edge| (edge.source, edge.destination, edge.edge_type));
        edges.dedup_by_key(|edge| (edge.source, edge.destination, edge.edge_type));

        ProcessedGraph {
            nodes,
            node_type_ids,
            node_types,
            edge_types,
            edges,
            has_node_types: raw.has_node_types,
            has_edge_types: raw.has_edge_types,
            has_weights: raw.has_weights,
            options,
        }
    }

    pub fn write(graph: &ProcessedGraph, dir: &Utf8Path) -> Result<Vec<FileRecord>, RetrievalError> {
        let metadata = graph.metadata();
        let mut outputs: Vec<(&str, Vec<u8>)> = Vec::new();

        let mut edges = String::new();
        for edge in &graph.edges {
            edges.push_str(&edge.source.to_string());
            edges.push('\t');
            edges.push_str(&edge.destination.to_string());
            if graph.has_edge_types {
                edges.push('\t');
                if let Some(edge_type) = edge.edge_type {
                    edges.push_str(&edge_type.to_string());
                }
            }
            if graph.has_weights {
                edges.push('\t');
                if let Some(weight) = edge.weight {
                    edges.push_str(&weight.to_string());
                }
            }
            edges.push('\n');
        }
        outputs.push((EDGES_FILE, edges.into_bytes()));

        if graph.options.load_nodes {
            let mut nodes = String::new();
            for (id, name) in graph.nodes.iter().enumerate() {
                nodes.push_str(name);
                if metadata.node_types_number.is_some() {
                    nodes.push('\t');
                    let types: Vec<String> =
                        graph.node_type_ids[id].iter().map(usize::to_string).collect();
                    nodes.push_str(&types.join(&NODE_TYPES_SEPARATOR.to_string()));
                }
                nodes.push('\n');
            }
            outputs.push((NODES_FILE, nodes.into_bytes()));
        }
        if metadata.node_types_number.is_some() {
            outputs.push((NODE_TYPES_FILE, vocabulary(&graph.node_types)));
        }
        if metadata.edge_types_number.is_some() {
            outputs.push((EDGE_TYPES_FILE, vocabulary(&graph.edge_types)));
        }
        let mut metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        metadata_json.push(b'\n');
        outputs.push((METADATA_FILE, metadata_json));

        let recorded_at = chrono::Utc::now().to_rfc3339();
        let mut records = Vec::with_capacity(outputs.len());
        for (name, content) in outputs {
            let path = dir.join(name);
            fs::write(path.as_std_path(), &content)
                .map_err(|err| RetrievalError::Filesystem(format!("write {path}: {err}")))?;
            records.push(FileRecord {
                path: name.to_string(),
                url: None,
                size: content.len() as u64,
                sha256: format!("{:x}", Sha256::digest(&content)),
                recorded_at: recorded_at.clone(),
            });
        }
        Ok(records)
    }
}

fn vocabulary(names: &[String]) -> Vec<u8> {
    let mut content = String::new();
    for name in names {
        content.push_str(name);
        content.push('\n');
    }
    content.into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Char(char),
    Whitespace,
}

impl Separator {
    fn resolve(declared: Option<char>, sample: &str) -> Self {
        match declared {
            Some(' ') => Separator::Whitespace,
            Some(separator) => Separator::Char(separator),
            None if sample.contains('\t') => Separator::Char('\t'),
            None if sample.contains(',') => Separator::Char(','),
            None => Separator::Whitespace,
        }
    }

    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match self {
            Separator::Char(separator) => text.split(*separator).map(str::trim).collect(),
            Separator::Whitespace => text.split_whitespace().collect(),
        }
    }
}

struct Row {
    line: u64,
    offset: u64,
    text: String,
}

struct Rows<'a> {
    path: &'a Utf8Path,
    reader: Box<dyn BufRead>,
    buffer: Vec<u8>,
    line: u64,
    offset: u64,
}

impl<'a> Rows<'a> {
    fn open(path: &'a Utf8Path) -> Result<Self, RetrievalError> {
        Ok(Self {
            path,
            reader: open_maybe_gz(path)?,
            buffer: Vec::new(),
            line: 0,
            offset: 0,
        })
    }

    fn next_row(&mut self) -> Result<Option<Row>, RetrievalError> {
        self.buffer.clear();
        let start = self.offset;
        let read = self
            .reader
            .read_until(b'\n', &mut self.buffer)
            .map_err(|err| malformed(self.path, self.line + 1, start, format!("read failed: {err}")))?;
        if read == 0 {
            return Ok(None);
        }
        self.line += 1;
        self.offset += read as u64;
        let mut end = self.buffer.len();
        if end > 0 && self.buffer[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && self.buffer[end - 1] == b'\r' {
            end -= 1;
        }
        let text = std::str::from_utf8(&self.buffer[..end])
            .map_err(|_| malformed(self.path, self.line, start, "invalid UTF-8"))?
            .to_string();
        Ok(Some(Row {
            line: self.line,
            offset: start,
            text,
        }))
    }
}

struct Table<'a> {
    rows: Rows<'a>,
    separator: Separator,
    comment_symbol: Option<&'a str>,
    header: Option<(Row, Vec<String>)>,
    pending: Option<Row>,
}

impl<'a> Table<'a> {
    fn open(
        path: &'a Utf8Path,
        declared: Option<char>,
        header: bool,
        comment_symbol: Option<&'a str>,
        rows_to_skip: usize,
    ) -> Result<Self, RetrievalError> {
        let mut rows = Rows::open(path)?;
        for _ in 0..rows_to_skip {
            if rows.next_row()?.is_none() {
                break;
            }
        }
        let comment_symbol = comment_symbol.filter(|symbol| !symbol.is_empty());
        let mut table = Self {
            rows,
            separator: Separator::Whitespace,
            comment_symbol,
            header: None,
            pending: None,
        };
        let first = table.next_meaningful()?;
        let Some(first) = first else {
            table.separator = Separator::resolve(declared, "");
            return Ok(table);
        };
        table.separator = Separator::resolve(declared, &first.text);
        if header {
            let names = table
                .separator
                .split(&first.text)
                .into_iter()
                .map(str::to_string)
                .collect();
            table.header = Some((first, names));
        } else {
            table.pending = Some(first);
        }
        Ok(table)
    }

    fn next_meaningful(&mut self) -> Result<Option<Row>, RetrievalError> {
        while let Some(row) = self.rows.next_row()? {
            let trimmed = row.text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(symbol) = self.comment_symbol {
                if trimmed.starts_with(symbol) {
                    continue;
                }
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn next(&mut self) -> Result<Option<Row>, RetrievalError> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        self.next_meaningful()
    }

    fn column(&self, column: &Column) -> Result<usize, RetrievalError> {
        match column {
            Column::Number(index) => Ok(*index),
            Column::Name(name) => match &self.header {
                Some((row, names)) => names.iter().position(|candidate| candidate == name).ok_or_else(|| {
                    malformed(
                        self.rows.path,
                        row.line,
                        row.offset,
                        format!("header has no column named '{name}'"),
                    )
                }),
                None => Err(malformed(
                    self.rows.path,
                    0,
                    0,
                    format!("column '{name}' is addressed by name but the file has no header"),
                )),
            },
        }
    }
}

fn read_edges(path: &Utf8Path, format: &EdgeListFormat) -> Result<Vec<RawEdge>, RetrievalError> {
    let mut table = Table::open(
        path,
        format.separator,
        format.header,
        format.comment_symbol.as_deref(),
        format.rows_to_skip,
    )?;
    let sources = table.column(&format.sources)?;
    let destinations = table.column(&format.destinations)?;
    let edge_types = format
        .edge_types
        .as_ref()
        .map(|column| table.column(column))
        .transpose()?;
    let weights = format
        .weights
        .as_ref()
        .map(|column| table.column(column))
        .transpose()?;

    let mut edges = Vec::new();
    while let Some(row) = table.next()? {
        let fields = table.separator.split(&row.text);
        let source = node_name(path, &row, &fields, sources)?;
        let destination = node_name(path, &row, &fields, destinations)?;
        let edge_type = match edge_types {
            Some(index) => {
                let cell = field(path, &row, &fields, index)?;
                if cell.is_empty() {
                    format.default_edge_type.clone()
                } else {
                    Some(cell.to_string())
                }
            }
            None => format.default_edge_type.clone(),
        };
        let weight = match weights {
            Some(index) => {
                let cell = field(path, &row, &fields, index)?;
                if cell.is_empty() && format.default_weight.is_some() {
                    format.default_weight
                } else {
                    Some(parse_weight(path, &row, cell)?)
                }
            }
            None => format.default_weight,
        };
        edges.push(RawEdge {
            source,
            destination,
            edge_type,
            weight,
        });
    }
    debug!(path = %path, edges = edges.len(), "parsed edge list");
    Ok(edges)
}

fn read_nodes(path: &Utf8Path, format: &NodeListFormat) -> Result<Vec<RawNode>, RetrievalError> {
    let mut table = Table::open(
        path,
        format.separator,
        format.header,
        format.comment_symbol.as_deref(),
        format.rows_to_skip,
    )?;
    let names = table.column(&format.nodes)?;
    let node_types = format
        .node_types
        .as_ref()
        .map(|column| table.column(column))
        .transpose()?;

    let mut nodes = Vec::new();
    while let Some(row) = table.next()? {
        let fields = table.separator.split(&row.text);
        let name = node_name(path, &row, &fields, names)?;
        let mut types: Vec<String> = match node_types {
            Some(index) => {
                let cell = field(path, &row, &fields, index)?;
                match format.node_types_separator {
                    Some(separator) => cell
                        .split(separator)
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect(),
                    None if cell.is_empty() => Vec::new(),
                    None => vec![cell.to_string()],
                }
            }
            None => Vec::new(),
        };
        if types.is_empty() {
            if let Some(default) = &format.default_node_type {
                types.push(default.clone());
            }
        }
        nodes.push(RawNode { name, types });
    }
    debug!(path = %path, nodes = nodes.len(), "parsed node list");
    Ok(nodes)
}

fn field<'f>(
    path: &Utf8Path,
    row: &Row,
    fields: &[&'f str],
    index: usize,
) -> Result<&'f str, RetrievalError> {
    fields.get(index).copied().ok_or_else(|| {
        malformed(
            path,
            row.line,
            row.offset,
            format!("missing column {index} (row has {} fields)", fields.len()),
        )
    })
}

fn node_name(
    path: &Utf8Path,
    row: &Row,
    fields: &[&str],
    index: usize,
) -> Result<String, RetrievalError> {
    let name = field(path, row, fields, index)?;
    if name.is_empty() {
        return Err(malformed(path, row.line, row.offset, "empty node name"));
    }
    Ok(name.to_string())
}

fn parse_weight(path: &Utf8Path, row: &Row, cell: &str) -> Result<f64, RetrievalError> {
    match cell.parse::<f64>() {
        Ok(weight) if weight.is_finite() => Ok(weight),
        _ => Err(malformed(
            path,
            row.line,
            row.offset,
            format!("invalid weight '{cell}'"),
        )),
    }
}

fn malformed(path: &Utf8Path, line: u64, offset: u64, message: impl Into<String>) -> RetrievalError {
    RetrievalError::Preprocess {
        path: path.to_string(),
        line,
        offset,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(directed: bool) -> PreprocessOptions {
        PreprocessOptions::new(directed)
    }

    fn raw(edges: &[(&str, &str)]) -> RawGraph {
        RawGraph {
            edges: edges
                .iter()
                .map(|(source, destination)| RawEdge {
                    source: source.to_string(),
                    destination: destination.to_string(),
                    edge_type: None,
                    weight: None,
                })
                .collect(),
            ..RawGraph::default()
        }
    }

    #[test]
    fn separator_detection() {
        assert_eq!(Separator::resolve(None, "a\tb"), Separator::Char('\t'));
        assert_eq!(Separator::resolve(None, "a,b"), Separator::Char(','));
        assert_eq!(Separator::resolve(None, "a b"), Separator::Whitespace);
        assert_eq!(Separator::resolve(Some(' '), "a\tb"), Separator::Whitespace);
        assert_eq!(Separator::Whitespace.split("a   b\t c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn numeric_names_sort_numerically() {
        let graph = Preprocessor::build(raw(&[("10", "2"), ("2", "1")]), options(true));
        assert_eq!(graph.nodes, vec!["1", "2", "10"]);
        assert_eq!(
            graph
                .edges
                .iter()
                .map(|edge| (edge.source, edge.destination))
                .collect::<Vec<_>>(),
            vec![(1, 0), (2, 1)]
        );
    }

    #[test]
    fn undirected_duplicates_collapse() {
        let graph = Preprocessor::build(
            raw(&[("b", "a"), ("a", "b"), ("a", "a"), ("a", "b")]),
            options(false),
        );
        assert_eq!(
            graph
                .edges
                .iter()
                .map(|edge| (edge.source, edge.destination))
                .collect::<Vec<_>>(),
            vec![(0, 0), (0, 1), (1, 0)]
        );
        assert_eq!(graph.metadata().edges_number, 3);
    }

    #[test]
    fn variant_key_depends_on_loaded_columns() {
        let format = GraphFormat::edges_only(EdgeListFormat::new(
            "edges.tsv",
            Column::Number(0),
            Column::Number(1),
        ));
        let full = variant_key(&format, &options(false));
        assert_eq!(full.len(), 16);
        assert_eq!(full, variant_key(&format, &options(true)));

        let variants = [
            PreprocessOptions {
                load_nodes: false,
                ..options(false)
            },
            PreprocessOptions {
                load_node_types: false,
                ..options(false)
            },
            PreprocessOptions {
                load_edge_types: false,
                ..options(false)
            },
            PreprocessOptions {
                load_edge_weights: false,
                ..options(false)
            },
        ];
        let keys: BTreeSet<String> = variants
            .iter()
            .map(|variant| variant_key(&format, variant))
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(!keys.contains(&full));
    }

    #[test]
    fn dropped_edge_types_merge_parallel_edges() {
        let mut graph = raw(&[("a", "b"), ("a", "b")]);
        graph.has_edge_types = true;
        graph.has_weights = true;
        graph.edges[0].edge_type = Some("binds".to_string());
        graph.edges[1].edge_type = Some("inhibits".to_string());
        graph.edges[0].weight = Some(0.5);

        let typed = Preprocessor::build(graph.clone(), options(true));
        assert_eq!(typed.edges.len(), 2);
        assert_eq!(typed.edge_types, vec!["binds", "inhibits"]);

        let untyped = Preprocessor::build(
            graph,
            PreprocessOptions {
                load_edge_types: false,
                load_edge_weights: false,
                ..options(true)
            },
        );
        assert_eq!(untyped.edges.len(), 1);
        assert!(untyped.edge_types.is_empty());
        assert_eq!(untyped.edges[0].weight, None);
        let metadata = untyped.metadata();
        assert_eq!(metadata.edge_types_number, None);
        assert!(!metadata.has_weights);
    }
}
