//! Minimal HTTP/1.1 backend with scripted status codes.

use std::{
    collections::VecDeque,
    io::{BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
};

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<(u16, String)>,
    fallback: (u16, String),
    requests: Vec<Request>,
    cut_first: bool,
}

pub struct FakeBackend {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
}

impl FakeBackend {
    /// Replies with `replies` in order, then `fallback` forever.
    pub fn start(replies: &[(u16, &str)], fallback: (u16, &str)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
        let addr = listener.local_addr().unwrap();
        let script = Arc::new(Mutex::new(Script {
            replies: replies
                .iter()
                .map(|(status, body)| (*status, body.to_string()))
                .collect(),
            fallback: (fallback.0, fallback.1.to_string()),
            requests: Vec::new(),
            cut_first: false,
        }));

        let shared = Arc::clone(&script);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let script = Arc::clone(&shared);
                thread::spawn(move || serve(stream, script));
            }
        });

        Self { addr, script }
    }

    /// Like `start`, but the first reply announces a longer body than it sends
    /// and then drops the connection.
    pub fn start_cut_short(replies: &[(u16, &str)], fallback: (u16, &str)) -> Self {
        let backend = Self::start(replies, fallback);
        backend.script.lock().unwrap().cut_first = true;
        backend
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.script.lock().unwrap().requests.clone()
    }
}

/// A URL nothing listens on.
pub fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/write")
}

fn serve(stream: TcpStream, script: Arc<Mutex<Script>>) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    // Keep-alive: one request after another until the client hangs up.
    while let Some(request) = read_request(&mut reader) {
        let (status, body, cut) = {
            let mut script = script.lock().unwrap();
            script.requests.push(request);
            let cut = std::mem::take(&mut script.cut_first);
            let reply = script.replies.pop_front();
            let (status, body) = reply.unwrap_or_else(|| script.fallback.clone());
            (status, body, cut)
        };

        if cut {
            let head = format!(
                "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\n\r\n",
                reason(status),
                body.len() + 1000
            );
            let _ = writer.write_all(head.as_bytes());
            let _ = writer.write_all(body.as_bytes());
            let _ = writer.flush();
            let _ = writer.shutdown(std::net::Shutdown::Both);
            return;
        }

        let head = if status == 204 {
            format!("HTTP/1.1 {status} {}\r\n\r\n", reason(status))
        } else {
            format!(
                "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                reason(status),
                body.len()
            )
        };
        if writer.write_all(head.as_bytes()).is_err() {
            return;
        }
        if status != 204 && writer.write_all(body.as_bytes()).is_err() {
            return;
        }
        let _ = writer.flush();
    }
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Request> {
    let mut line = String::new();
    if reader.read_line(&mut line).ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().ok()?;
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).ok()?;

    Some(Request { method, path, body })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
