//! Minimal in-process HTTP server for driving the real clients.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Debug)]
pub enum Body {
    Full(String),
    /// Sent with chunked transfer encoding, one write per piece.
    Chunked(Vec<Vec<u8>>),
}

#[derive(Clone, Debug)]
pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
    pub status: u16,
    pub content_type: &'static str,
    pub body: Body,
}

impl Route {
    pub fn json(method: &'static str, path: &'static str, body: &str) -> Self {
        Self {
            method,
            path,
            status: 200,
            content_type: "application/json",
            body: Body::Full(body.to_string()),
        }
    }

    pub fn ndjson(path: &'static str, lines: &[&str]) -> Self {
        Self {
            method: "POST",
            path,
            status: 200,
            content_type: "application/x-ndjson",
            body: Body::Full(lines.iter().map(|l| format!("{l}\n")).collect()),
        }
    }

    pub fn chunked(path: &'static str, content_type: &'static str, pieces: Vec<Vec<u8>>) -> Self {
        Self {
            method: "POST",
            path,
            status: 200,
            content_type,
            body: Body::Chunked(pieces),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Captured {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

pub struct StubServer {
    pub port: u16,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl StubServer {
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let port = listener.local_addr().expect("stub addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let captured = Arc::clone(&captured);
                tokio::spawn(async move { serve(socket, &routes, &captured).await });
            }
        });

        Self { port, requests }
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().expect("requests lock").clone()
    }
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

async fn serve(mut socket: TcpStream, routes: &[Route], captured: &Mutex<Vec<Captured>>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let route = routes
        .iter()
        .find(|r| r.method == request.method && r.path == request.path)
        .cloned()
        .unwrap_or(Route {
            method: "GET",
            path: "",
            status: 404,
            content_type: "text/plain",
            body: Body::Full("not found".to_string()),
        });
    captured.lock().expect("requests lock").push(request);

    let head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: {}\r\nconnection: close\r\n",
        route.status,
        reason(route.status),
        route.content_type
    );

    match route.body {
        Body::Full(body) => {
            let response = format!("{head}content-length: {}\r\n\r\n{body}", body.len());
            let _ = socket.write_all(response.as_bytes()).await;
        }
        Body::Chunked(pieces) => {
            let _ = socket
                .write_all(format!("{head}transfer-encoding: chunked\r\n\r\n").as_bytes())
                .await;
            for piece in pieces {
                let mut frame = format!("{:x}\r\n", piece.len()).into_bytes();
                frame.extend_from_slice(&piece);
                frame.extend_from_slice(b"\r\n");
                let _ = socket.write_all(&frame).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(header_end + length);
    let body = String::from_utf8_lossy(&buf[header_end..end]).into_owned();

    Some(Captured {
        method,
        path,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
