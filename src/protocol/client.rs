//  Copyright 2020 Two Sigma Investments, LP.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

// The supervisor side of the protocol.

use anyhow::{Result, Context};
use std::{
    io::{prelude::*, BufReader},
    os::unix::net::UnixStream,
    path::Path,
};
use super::{Request, Response};

pub struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Client {
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let reader = BufReader::new(stream.try_clone().context("Failed to clone socket")?);
        Ok(Self { reader, writer: stream })
    }

    /// Sends a raw request line. A trailing newline is added.
    pub fn send_raw(&mut self, raw: &[u8]) -> Result<Response> {
        self.writer.write_all(raw)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .context("Failed to send request")?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).context("Failed to read response")?;
        ensure!(n > 0, "Connection closed before a response was received");

        serde_json::from_str(line.trim_end())
            .with_context(|| format!("Invalid response `{}`", line.trim_end()))
    }

    pub fn request(&mut self, req: &Request) -> Result<Response> {
        let raw = req.encode().context("Failed to encode request")?;
        self.send_raw(raw.as_bytes())
    }

    pub fn chroot(&mut self, dir: &str) -> Result<Response> {
        self.request(&Request::from_tokens(&[&["CHROOT", dir]]))
    }

    pub fn mount(&mut self, source: &str, target: &str,
                 fstype: &str, flags: u64, data: &str) -> Result<Response> {
        let flags = flags.to_string();
        self.request(&Request::from_tokens(&[
            &["MOUNT", source, target],
            &[fstype, flags.as_str(), data],
        ]))
    }
}
