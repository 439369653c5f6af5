use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::domain::{DatasetDescriptor, DatasetName, RemoteFile, RepositoryName, Version};
use crate::error::RetrievalError;
use crate::format::GraphFormat;

const BUILTIN: &str = include_str!("../catalog/string.json");

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTemplate {
    pub url: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub extract: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDetails {
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: Option<Vec<String>>,
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<FileTemplate>>,
    #[serde(default)]
    pub format: Option<GraphFormat>,
    #[serde(default)]
    pub directed: Option<bool>,
    #[serde(default)]
    pub nodes: Option<u64>,
    #[serde(default)]
    pub edges: Option<u64>,
    #[serde(default)]
    pub citation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetDetails),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub versions: Vec<String>,
    pub latest: String,
    #[serde(default)]
    pub directed: bool,
    #[serde(default)]
    pub shorthand: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    pub files: Vec<FileTemplate>,
    pub format: GraphFormat,
    pub datasets: BTreeMap<String, DatasetEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub repositories: BTreeMap<String, RepositoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogListing {
    pub repository: String,
    pub name: String,
    pub versions: Vec<String>,
    pub latest: String,
}

struct Resolved<'a> {
    params: BTreeMap<String, String>,
    versions: &'a [String],
    latest: &'a str,
    files: &'a [FileTemplate],
    format: &'a GraphFormat,
    directed: bool,
    nodes: Option<u64>,
    edges: Option<u64>,
    citation: Option<&'a str>,
}

impl Catalog {
    pub fn builtin() -> Result<Self, RetrievalError> {
        Self::parse(BUILTIN)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, RetrievalError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| RetrievalError::CatalogRead(path.as_std_path().to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, RetrievalError> {
        let parsed: Catalog = serde_json::from_str(content)
            .map_err(|err| RetrievalError::CatalogParse(err.to_string()))?;
        let mut catalog = Catalog::default();
        for (name, repository) in parsed.repositories {
            let key: RepositoryName = name
                .parse()
                .map_err(|_| RetrievalError::CatalogParse(format!("invalid repository name {name}")))?;
            validate_repository(key.as_str(), &repository)?;
            catalog.repositories.insert(key.as_str().to_string(), repository);
        }
        Ok(catalog)
    }

    pub fn extend(&mut self, other: Catalog) {
        self.repositories.extend(other.repositories);
    }

    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    pub fn datasets(&self, repository: &RepositoryName) -> Result<Vec<CatalogListing>, RetrievalError> {
        let entry = self.repository(repository)?;
        entry
            .datasets
            .keys()
            .map(|name| {
                let resolved = resolve_entry(repository.as_str(), entry, name)?;
                Ok(CatalogListing {
                    repository: repository.to_string(),
                    name: name.clone(),
                    versions: resolved.versions.to_vec(),
                    latest: resolved.latest.to_string(),
                })
            })
            .collect()
    }

    pub fn descriptor(
        &self,
        repository: &RepositoryName,
        name: &DatasetName,
        version: &Version,
        directed: Option<bool>,
    ) -> Result<DatasetDescriptor, RetrievalError> {
        let entry = self.repository(repository)?;
        let resolved = resolve_entry(repository.as_str(), entry, name.as_str())?;

        let version_str = if version.is_latest() {
            resolved.latest
        } else {
            resolved
                .versions
                .iter()
                .find(|candidate| candidate.as_str() == version.as_str())
                .map(String::as_str)
                .ok_or_else(|| RetrievalError::UnknownVersion {
                    name: name.to_string(),
                    version: version.to_string(),
                    available: resolved.versions.join(", "),
                })?
        };
        let concrete: Version = version_str.parse()?;

        let mut vars = resolved.params.clone();
        vars.insert("name".to_string(), name.to_string());
        vars.insert("repository".to_string(), repository.to_string());
        vars.insert("version".to_string(), concrete.to_string());

        let mut files = Vec::with_capacity(resolved.files.len());
        for template in resolved.files {
            files.push(RemoteFile {
                url: render(&template.url, &vars)?,
                path: render(&template.path, &vars)?,
                size: template.size,
                sha256: template.sha256.as_ref().map(|hash| hash.to_lowercase()),
                extract: template.extract,
            });
        }
        let mut format = resolved.format.clone();
        format.edges.path = render(&format.edges.path, &vars)?;
        if let Some(nodes) = format.nodes.as_mut() {
            nodes.path = render(&nodes.path, &vars)?;
        }

        let descriptor = DatasetDescriptor::new(
            repository.clone(),
            name.clone(),
            concrete,
            directed.unwrap_or(resolved.directed),
            files,
            format,
        )?;
        Ok(descriptor.with_metadata(
            resolved.nodes,
            resolved.edges,
            resolved.citation.map(str::to_string),
        ))
    }

    fn repository(&self, repository: &RepositoryName) -> Result<&RepositoryEntry, RetrievalError> {
        self.repositories
            .get(repository.as_str())
            .ok_or_else(|| RetrievalError::UnknownRepository(repository.to_string()))
    }
}

fn resolve_entry<'a>(
    repository_name: &str,
    repository: &'a RepositoryEntry,
    name: &str,
) -> Result<Resolved<'a>, RetrievalError> {
    let entry = repository
        .datasets
        .get(name)
        .ok_or_else(|| RetrievalError::UnknownDataset {
            repository: repository_name.to_string(),
            name: name.to_string(),
        })?;
    let defaults = Resolved {
        params: BTreeMap::new(),
        versions: &repository.versions,
        latest: &repository.latest,
        files: &repository.files,
        format: &repository.format,
        directed: repository.directed,
        nodes: None,
        edges: None,
        citation: repository.citation.as_deref(),
    };
    match entry {
        DatasetEntry::Shorthand(value) => {
            let key = repository.shorthand.as_deref().ok_or_else(|| {
                RetrievalError::CatalogParse(format!(
                    "dataset {name} uses shorthand but the repository declares no shorthand parameter"
                ))
            })?;
            let mut params = BTreeMap::new();
            params.insert(key.to_string(), value.clone());
            Ok(Resolved { params, ..defaults })
        }
        DatasetEntry::Detailed(details) => Ok(Resolved {
            params: details.params.clone(),
            versions: details.versions.as_deref().unwrap_or(defaults.versions),
            latest: details.latest.as_deref().unwrap_or(defaults.latest),
            files: details.files.as_deref().unwrap_or(defaults.files),
            format: details.format.as_ref().unwrap_or(defaults.format),
            directed: details.directed.unwrap_or(defaults.directed),
            nodes: details.nodes,
            edges: details.edges,
            citation: details.citation.as_deref().or(defaults.citation),
        }),
    }
}

fn validate_repository(name: &str, repository: &RepositoryEntry) -> Result<(), RetrievalError> {
    if !repository.versions.contains(&repository.latest) {
        return Err(RetrievalError::CatalogParse(format!(
            "repository {name}: latest version {} is not listed",
            repository.latest
        )));
    }
    for (dataset, entry) in &repository.datasets {
        dataset
            .parse::<DatasetName>()
            .map_err(|_| RetrievalError::CatalogParse(format!("invalid dataset name {dataset}")))?;
        let resolved = resolve_entry(name, repository, dataset)?;
        if !resolved.versions.iter().any(|version| version == resolved.latest) {
            return Err(RetrievalError::CatalogParse(format!(
                "dataset {dataset}: latest version {} is not listed",
                resolved.latest
            )));
        }
        if let DatasetEntry::Shorthand(value) = entry {
            if value.trim().is_empty() {
                return Err(RetrievalError::CatalogParse(format!(
                    "dataset {dataset}: empty shorthand value"
                )));
            }
        }
    }
    Ok(())
}

fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String, RetrievalError> {
    let mut missing = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(RetrievalError::CatalogParse(format!(
            "template {template} references unknown parameter {{{key}}}"
        ))),
        None => Ok(rendered.into_owned()),
    }
}
