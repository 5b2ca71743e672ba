//! # Synchronous Client
//!
//! One blocking TCP connection, one request in flight: write a command
//! line, read one response line. Missing-key errors are folded into the
//! return types (`None` / `false`); every other server error surfaces as
//! [`ClientError::Server`].

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use skv_common::codec;
use skv_common::{Command, KvError, Response};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error")]
    Protocol,
    #[error("server error: {0}")]
    Server(String),
}

/// Connection settings; all timeouts are optional.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:7000".to_string(),
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Blocking client over a single persistent connection.
pub struct Client {
    reader: BufReader<TcpStream>,
    line: String,
}

impl Client {
    /// Connects with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let mut config = ClientConfig::default();
        config.addr = addr.into();
        Self::with_config(config)
    }

    /// Connects with explicit configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let stream = connect_stream(&config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        stream.set_nodelay(true)?;

        Ok(Client {
            reader: BufReader::new(stream),
            line: String::with_capacity(128),
        })
    }

    /// Stores a value. `ttl_secs = 0` means no expiration.
    pub fn put(&mut self, key: &str, value: &str, ttl_secs: u32) -> ClientResult<()> {
        let cmd = Command::Put {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs,
        };
        match self.exec(&cmd)? {
            Response::Ok(_) => Ok(()),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Fetches a value; `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: &str) -> ClientResult<Option<String>> {
        let cmd = Command::Get { key: key.to_string() };
        match self.exec(&cmd)? {
            Response::Ok(Some(value)) => Ok(Some(value)),
            Response::Ok(None) => Err(ClientError::Protocol),
            Response::Error(message) if message == KvError::KeyNotFound.to_string() => Ok(None),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Deletes a key; returns whether a key was removed.
    pub fn delete(&mut self, key: &str) -> ClientResult<bool> {
        let cmd = Command::Delete { key: key.to_string() };
        match self.exec(&cmd)? {
            Response::Ok(_) => Ok(true),
            Response::Error(message) if message == KvError::KeyNotFound.to_string() => Ok(false),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Probes a key without refreshing its recency.
    pub fn exists(&mut self, key: &str) -> ClientResult<bool> {
        let cmd = Command::Exists { key: key.to_string() };
        match self.exec(&cmd)? {
            Response::Ok(Some(flag)) if flag == "1" => Ok(true),
            Response::Ok(Some(flag)) if flag == "0" => Ok(false),
            Response::Ok(_) => Err(ClientError::Protocol),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Ends the session; the server acknowledges and closes.
    pub fn quit(mut self) -> ClientResult<()> {
        match self.exec(&Command::Quit)? {
            Response::Ok(_) => Ok(()),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    /// Sends an arbitrary line and returns the raw response line.
    ///
    /// Protocol-robustness tests use this to send malformed input.
    pub fn send_raw(&mut self, line: &str) -> ClientResult<String> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        self.read_line()
    }

    fn exec(&mut self, cmd: &Command) -> ClientResult<Response> {
        let request = codec::format_command(cmd);
        let stream = self.reader.get_mut();
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        let line = self.read_line()?;
        codec::parse_response(&line).map_err(|_| ClientError::Protocol)
    }

    fn read_line(&mut self) -> ClientResult<String> {
        self.line.clear();
        let read = self.reader.read_line(&mut self.line)?;
        if read == 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection",
            )));
        }
        Ok(self.line.trim_end_matches(['\n', '\r']).to_string())
    }
}

fn connect_stream(config: &ClientConfig) -> ClientResult<TcpStream> {
    match config.connect_timeout {
        Some(timeout) => {
            let addr = config
                .addr
                .to_socket_addrs()?
                .next()
                .ok_or(ClientError::Protocol)?;
            Ok(TcpStream::connect_timeout(&addr, timeout)?)
        }
        None => Ok(TcpStream::connect(config.addr.as_str())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Scripted server: asserts each received line, sends each reply.
    fn spawn_server(script: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut stream = stream;
            let mut line = String::new();
            for (expect, reply) in script {
                line.clear();
                reader.read_line(&mut line).expect("read");
                assert_eq!(line.trim_end(), expect);
                stream.write_all(reply.as_bytes()).expect("write");
                stream.write_all(b"\n").expect("write");
                stream.flush().expect("flush");
            }
        });

        addr
    }

    fn client_with_addr(addr: String) -> Client {
        let config = ClientConfig {
            addr,
            read_timeout: Some(Duration::from_secs(2)),
            write_timeout: Some(Duration::from_secs(2)),
            connect_timeout: Some(Duration::from_secs(2)),
        };
        Client::with_config(config).expect("client")
    }

    #[test]
    fn put_get_roundtrip() {
        let addr = spawn_server(vec![
            ("PUT apple red 5", "OK stored"),
            ("GET apple", "OK red"),
        ]);
        let mut client = client_with_addr(addr);
        client.put("apple", "red", 5).expect("put");
        assert_eq!(client.get("apple").expect("get"), Some("red".to_string()));
    }

    #[test]
    fn missing_key_maps_to_none_and_false() {
        let addr = spawn_server(vec![
            ("GET ghost", "ERROR key not found"),
            ("DELETE ghost", "ERROR key not found"),
            ("EXISTS ghost", "OK 0"),
        ]);
        let mut client = client_with_addr(addr);
        assert_eq!(client.get("ghost").expect("get"), None);
        assert!(!client.delete("ghost").expect("delete"));
        assert!(!client.exists("ghost").expect("exists"));
    }

    #[test]
    fn other_server_errors_surface() {
        let addr = spawn_server(vec![("PUT k v", "ERROR upstream unavailable")]);
        let mut client = client_with_addr(addr);
        match client.put("k", "v", 0) {
            Err(ClientError::Server(message)) => assert_eq!(message, "upstream unavailable"),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn raw_lines_pass_through_unchanged() {
        let addr = spawn_server(vec![("FOO", "ERROR invalid command")]);
        let mut client = client_with_addr(addr);
        assert_eq!(client.send_raw("FOO").expect("raw"), "ERROR invalid command");
    }

    #[test]
    fn quit_acknowledged() {
        let addr = spawn_server(vec![("QUIT", "OK bye")]);
        let client = client_with_addr(addr);
        client.quit().expect("quit");
    }
}
