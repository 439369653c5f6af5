#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use graph_retrieval::domain::{DatasetDescriptor, RemoteFile};
use graph_retrieval::format::{Column, EdgeListFormat, GraphFormat, NodeListFormat};
use graph_retrieval::http::{HttpClient, HttpResponse, TransportError};

pub const LINKS_URL: &str = "https://mock.test/string/525.protein.links.txt.gz";
pub const INFO_URL: &str = "https://mock.test/string/525.protein.info.txt";

pub const LINKS: &str = "protein1 protein2 combined_score\n\
525.A 525.B 900\n\
525.B 525.A 900\n\
525.A 525.C 400\n\
525.C 525.C 150\n";

pub const INFO: &str = "525.A\tkinase\n525.B\tkinase\n525.C\treceptor\n525.D\treceptor\n";

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Body(Vec<u8>),
    /// Sends part of the body, then fails the read.
    Truncated { body: Vec<u8>, advertised: u64 },
    /// Sends the whole body under a wrong Content-Length.
    Advertised { body: Vec<u8>, advertised: u64 },
    Transport,
}

/// Scripted in-memory HTTP server. Scripted replies for a URL are consumed
/// first; afterwards the served body (or 404) is returned.
#[derive(Default)]
pub struct MockHttp {
    scripts: Mutex<BTreeMap<String, VecDeque<Reply>>>,
    bodies: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    pub fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn requests(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl HttpClient for MockHttp {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(reply) => reply,
            None => match self.bodies.lock().unwrap().get(url) {
                Some(body) => Reply::Body(body.clone()),
                None => Reply::Status(404),
            },
        };
        match reply {
            Reply::Status(status) => Ok(response(status, Some(0), Cursor::new(Vec::new()))),
            Reply::Body(body) => {
                let length = body.len() as u64;
                Ok(response(200, Some(length), Cursor::new(body)))
            }
            Reply::Truncated { body, advertised } => Ok(response(
                200,
                Some(advertised),
                FailingReader {
                    inner: Cursor::new(body),
                },
            )),
            Reply::Advertised { body, advertised } => {
                Ok(response(200, Some(advertised), Cursor::new(body)))
            }
            Reply::Transport => Err(TransportError::transient("connection reset by peer")),
        }
    }
}

fn response(status: u16, content_length: Option<u64>, body: impl Read + Send + 'static) -> HttpResponse {
    HttpResponse {
        status,
        content_length,
        body: Box::new(body),
    }
}

struct FailingReader {
    inner: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            read => Ok(read),
        }
    }
}

pub fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

/// Two-file STRING-like dataset: a gzipped whitespace edge list with a
/// header and a tab separated node list with one type per node.
pub fn descriptor() -> DatasetDescriptor {
    let mut edges = EdgeListFormat::new(
        "525.protein.links.txt.gz",
        Column::Name("protein1".to_string()),
        Column::Name("protein2".to_string()),
    );
    edges.separator = Some(' ');
    edges.header = true;
    edges.weights = Some(Column::Name("combined_score".to_string()));
    let mut nodes = NodeListFormat::new("525.protein.info.txt", Column::Number(0));
    nodes.separator = Some('\t');
    nodes.node_types = Some(Column::Number(1));
    let format = GraphFormat::edges_only(edges).with_nodes(nodes);

    DatasetDescriptor::new(
        "string".parse().unwrap(),
        "AcidocellaFacilis".parse().unwrap(),
        "12.0".parse().unwrap(),
        false,
        vec![
            RemoteFile::new(LINKS_URL, "525.protein.links.txt.gz"),
            RemoteFile::new(INFO_URL, "525.protein.info.txt"),
        ],
        format,
    )
    .unwrap()
}

pub fn serve_dataset(http: &MockHttp) {
    http.serve(LINKS_URL, gzip(LINKS.as_bytes()));
    http.serve(INFO_URL, INFO);
}
