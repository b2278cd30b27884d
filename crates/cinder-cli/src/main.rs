//! Command-line client for the cinder server.
//!
//! Two modes: pass a command as trailing arguments for a one-shot
//! round-trip, or run with none for an interactive prompt. Either way
//! each command is framed as a request, exactly one response is read
//! back, and its projection is printed.
//!
//! ```text
//! $ cinder-cli set name tyler
//! (string) OK
//! $ cinder-cli
//! 127.0.0.1:1234> get name
//! (string) tyler
//! ```

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::process::ExitCode;

use bytes::{Buf, Bytes, BytesMut};
use clap::Parser;
use colored::Colorize;

use cinder_protocol::{ProtocolError, Request, Response};

#[derive(Debug, Parser)]
#[command(name = "cinder-cli", version, about = "Client for the cinder key-value server")]
struct Cli {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(long, short, default_value_t = 1234)]
    port: u16,

    /// Command to run, e.g. `set name tyler`. Starts an interactive
    /// prompt when omitted.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let stream = match TcpStream::connect((cli.host.as_str(), cli.port)) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} could not connect to {}:{}: {e}", "error:".red().bold(), cli.host, cli.port);
            return ExitCode::FAILURE;
        }
    };

    let mut session = Session::new(stream);
    let result = if cli.command.is_empty() {
        session.repl(&cli.host, cli.port)
    } else {
        session.round_trip(&cli.command).map(|response| {
            println!("{response}");
        })
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// One connection plus its receive buffer.
struct Session {
    stream: TcpStream,
    buf: BytesMut,
}

impl Session {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Sends one command and reads exactly one response.
    fn round_trip(&mut self, parts: &[String]) -> io::Result<Response> {
        let request = Request::new(
            parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
        );

        let mut out = BytesMut::new();
        request.marshal(&mut out).map_err(protocol_error)?;
        self.stream.write_all(&out)?;

        self.read_response()
    }

    /// Accumulates bytes until one complete response frame parses.
    fn read_response(&mut self) -> io::Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::unmarshal(&self.buf).map_err(protocol_error)?
            {
                self.buf.advance(consumed);
                return Ok(response);
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// The interactive prompt. `quit` / `exit` (or EOF) leaves.
    fn repl(&mut self, host: &str, port: u16) -> io::Result<()> {
        let prompt = format!("{host}:{port}> ");
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("{}", prompt.cyan());
            io::stdout().flush()?;

            let Some(line) = lines.next() else {
                println!();
                return Ok(());
            };
            let line = line?;
            let parts: Vec<String> = line.split_whitespace().map(str::to_owned).collect();

            match parts.first().map(String::as_str) {
                None => continue,
                Some("quit") | Some("exit") => return Ok(()),
                Some(_) => {}
            }

            match self.round_trip(&parts) {
                Ok(response) => println!("{response}"),
                // any transport failure means the connection is done
                Err(e) => return Err(e),
            }
        }
    }
}

fn protocol_error(e: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
