use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use ria_types::TransportKind;
use tracing::debug;
use ureq::Agent;

use crate::error::{TransportError, TransportResult};
use crate::traits::{Progress, Transport, WriteMode};

/// Chunks buffered between the download thread and the consumer.
const BODY_QUEUE_DEPTH: usize = 16;

/// Read-only store access over HTTP(S).
///
/// Only `exists`, `get` and `read_file` do anything. Archives are never
/// consulted, and every mutation fails with
/// [`TransportError::Unsupported`] instead of silently doing nothing.
///
/// `timeout` bounds connecting and waiting for response headers. Bodies are
/// read on a helper thread and only time out after `timeout` without any
/// data, so a slow but steady download is never cut off.
pub struct HttpTransport {
    origin: String,
    agent: Agent,
    buffer_size: usize,
    timeout: Duration,
}

/// What the download thread hands over.
enum BodyChunk {
    Data(Vec<u8>),
    Failed(TransportError),
    Done,
}

impl HttpTransport {
    /// `origin` is `scheme://authority`; store paths are appended to it.
    pub fn new(origin: impl Into<String>, buffer_size: usize, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .build();
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            agent: Agent::new_with_config(config),
            buffer_size: buffer_size.max(1),
            timeout,
        }
    }

    /// Absolute URL of a store path.
    pub fn url(&self, path: &Path) -> String {
        let path = path.display().to_string();
        if path.starts_with('/') {
            format!("{}{path}", self.origin)
        } else {
            format!("{}/{path}", self.origin)
        }
    }

    fn unsupported<T>(operation: &'static str) -> TransportResult<T> {
        Err(TransportError::unsupported(operation, TransportKind::Http))
    }

    /// GET `url` and feed the body to `sink` chunk by chunk. Returns the
    /// number of bytes received.
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> TransportResult<u64> {
        debug!(%url, "HTTP GET");
        let (tx, rx) = crossbeam_channel::bounded(BODY_QUEUE_DEPTH);
        let agent = self.agent.clone();
        let target = url.to_string();
        let chunk_size = self.buffer_size;
        thread::Builder::new()
            .name("ria-http-body".into())
            .spawn(move || download(&agent, &target, chunk_size, &tx))
            .map_err(|e| TransportError::Io {
                context: "starting HTTP download".into(),
                source: e,
            })?;

        let mut received = 0u64;
        loop {
            match rx.recv_timeout(self.timeout) {
                Ok(BodyChunk::Data(bytes)) => {
                    sink(&bytes).map_err(|e| TransportError::Io {
                        context: format!("storing body of {url}"),
                        source: e,
                    })?;
                    received += bytes.len() as u64;
                }
                Ok(BodyChunk::Done) => return Ok(received),
                Ok(BodyChunk::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::Timeout {
                        waited: self.timeout,
                        context: format!("data from {url}"),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Connectivity(format!(
                        "download of {url} ended unexpectedly"
                    )))
                }
            }
        }
    }
}

/// Body of the download thread. Stops early once the consumer is gone.
fn download(agent: &Agent, url: &str, chunk_size: usize, tx: &Sender<BodyChunk>) {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(BodyChunk::Failed(classify(e, url)));
            return;
        }
    };
    let mut reader = response.into_body().into_reader();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => BodyChunk::Done,
            Ok(n) => BodyChunk::Data(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => BodyChunk::Failed(TransportError::Connectivity(format!("reading {url}: {e}"))),
        };
        let last = !matches!(chunk, BodyChunk::Data(_));
        if tx.send(chunk).is_err() || last {
            return;
        }
    }
}

/// Translate a request failure, keeping "not there" apart from "not
/// reachable" by looking at the status code.
fn classify(err: ureq::Error, url: &str) -> TransportError {
    match err {
        ureq::Error::StatusCode(404 | 410) => TransportError::NotFound(url.to_string()),
        ureq::Error::StatusCode(401 | 403) => TransportError::PermissionDenied(url.to_string()),
        ureq::Error::StatusCode(code) => {
            TransportError::Connectivity(format!("{url} answered with status {code}"))
        }
        other => TransportError::Connectivity(format!("{url}: {other}")),
    }
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn mkdir(&mut self, _path: &Path) -> TransportResult<()> {
        Self::unsupported("mkdir")
    }

    fn symlink(&mut self, _target: &Path, _link: &Path) -> TransportResult<()> {
        Self::unsupported("symlink")
    }

    fn put(&mut self, _src: &Path, _dst: &Path, _progress: Progress<'_>) -> TransportResult<()> {
        Self::unsupported("put")
    }

    fn get(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()> {
        let url = self.url(src);
        let mut file = File::create(dst).map_err(|e| TransportError::from_io(e, dst))?;
        let mut written = 0u64;
        self.fetch(&url, &mut |bytes| {
            file.write_all(bytes)?;
            written += bytes.len() as u64;
            progress(written);
            Ok(())
        })?;
        file.flush().map_err(|e| TransportError::from_io(e, dst))
    }

    fn get_from_archive(
        &mut self,
        _archive: &Path,
        _entry: &Path,
        _dst: &Path,
        _progress: Progress<'_>,
    ) -> TransportResult<()> {
        Self::unsupported("get_from_archive")
    }

    fn in_archive(&mut self, _archive: &Path, _entry: &Path) -> TransportResult<bool> {
        Self::unsupported("in_archive")
    }

    fn rename(&mut self, _src: &Path, _dst: &Path) -> TransportResult<()> {
        Self::unsupported("rename")
    }

    fn remove(&mut self, _path: &Path) -> TransportResult<()> {
        Self::unsupported("remove")
    }

    fn remove_dir(&mut self, _path: &Path) -> TransportResult<()> {
        Self::unsupported("remove_dir")
    }

    fn exists(&mut self, path: &Path) -> TransportResult<bool> {
        let url = self.url(path);
        match self.agent.head(url.as_str()).call() {
            Ok(response) => Ok(response.status().as_u16() == 200),
            Err(ureq::Error::StatusCode(404 | 410)) => Ok(false),
            Err(e) => Err(classify(e, &url)),
        }
    }

    fn read_file(&mut self, path: &Path) -> TransportResult<String> {
        let url = self.url(path);
        let mut body = Vec::new();
        self.fetch(&url, &mut |bytes| {
            body.extend_from_slice(bytes);
            Ok(())
        })?;
        String::from_utf8(body)
            .map_err(|_| TransportError::Protocol(format!("{url} is not valid UTF-8")))
    }

    fn write_file(&mut self, _path: &Path, _content: &str, _mode: WriteMode) -> TransportResult<()> {
        Self::unsupported("write_file")
    }

    fn has_archive_tool(&mut self) -> TransportResult<bool> {
        Ok(false)
    }

    fn describe(&self, path: &Path) -> String {
        self.url(path)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn transport(origin: &str) -> HttpTransport {
        HttpTransport::new(origin, 4096, Duration::from_secs(5))
    }

    fn skip_request(stream: &TcpStream) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
    }

    /// Serve one canned response per accepted connection.
    fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                skip_request(&stream);
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{addr}")
    }

    /// Announce `announced` bytes, send `body` one byte per `pause`, then
    /// keep the connection open for `hold`.
    fn serve_trickle(body: &'static [u8], announced: usize, pause: Duration, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            skip_request(&stream);
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n");
            stream.write_all(head.as_bytes()).unwrap();
            for byte in body {
                thread::sleep(pause);
                if stream.write_all(&[*byte]).and_then(|()| stream.flush()).is_err() {
                    return;
                }
            }
            thread::sleep(hold);
        });
        format!("http://{addr}")
    }

    fn ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn not_found() -> String {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }

    #[test]
    fn url_joins_origin_and_path() {
        let io = transport("https://store.example.org/");
        assert_eq!(
            io.url(Path::new("/ria/abc/def/ria-layout-version")),
            "https://store.example.org/ria/abc/def/ria-layout-version"
        );
        assert_eq!(io.describe(Path::new("/x")), "https://store.example.org/x");
    }

    #[test]
    fn writes_fail_fast() {
        let mut io = transport("http://127.0.0.1:9");
        let p = Path::new("/x");
        for err in [
            io.mkdir(p).unwrap_err(),
            io.put(p, p, &mut |_| {}).unwrap_err(),
            io.rename(p, p).unwrap_err(),
            io.remove(p).unwrap_err(),
            io.remove_dir(p).unwrap_err(),
            io.write_file(p, "", WriteMode::Append).unwrap_err(),
            io.in_archive(p, p).unwrap_err(),
            io.get_from_archive(p, p, p, &mut |_| {}).unwrap_err(),
        ] {
            assert!(matches!(
                err,
                TransportError::Unsupported { transport: TransportKind::Http, .. }
            ));
        }
        assert!(!io.has_archive_tool().unwrap());
    }

    #[test]
    fn exists_and_read() {
        let origin = serve(vec![ok(""), not_found(), ok("1|l\n")]);
        let mut io = transport(&origin);
        assert!(io.exists(Path::new("/store/ria-layout-version")).unwrap());
        assert!(!io.exists(Path::new("/store/missing")).unwrap());
        assert_eq!(io.read_file(Path::new("/store/ria-layout-version")).unwrap(), "1|l\n");
    }

    #[test]
    fn get_distinguishes_missing_content() {
        let origin = serve(vec![not_found(), ok("content")]);
        let dir = tempfile::TempDir::new().unwrap();
        let dst = dir.path().join("out");
        let mut io = transport(&origin);

        let err = io.get(Path::new("/o/MD5-s7--x"), &dst, &mut |_| {}).unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));

        io.get(Path::new("/o/MD5-s7--x"), &dst, &mut |_| {}).unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "content");
    }

    #[test]
    fn unreachable_host_is_connectivity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut io = transport(&format!("http://{addr}"));
        assert!(matches!(
            io.exists(Path::new("/x")),
            Err(TransportError::Connectivity(_))
        ));
    }

    #[test]
    fn steady_download_outlives_read_timeout() {
        let body = b"thirty bytes of slow content!!";
        let origin = serve_trickle(body, body.len(), Duration::from_millis(50), Duration::ZERO);
        let dir = tempfile::TempDir::new().unwrap();
        let dst = dir.path().join("out");
        let mut io = HttpTransport::new(&origin, 4096, Duration::from_millis(500));

        let mut last = 0;
        io.get(Path::new("/o/MD5-s30--x"), &dst, &mut |n| last = n).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), body);
        assert_eq!(last, 30);
    }

    #[test]
    fn stalled_download_times_out() {
        let origin = serve_trickle(b"12345", 30, Duration::ZERO, Duration::from_secs(3));
        let dir = tempfile::TempDir::new().unwrap();
        let mut io = HttpTransport::new(&origin, 4096, Duration::from_millis(300));

        let err = io
            .get(Path::new("/o/MD5-s30--x"), &dir.path().join("out"), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }), "{err}");
    }
}
