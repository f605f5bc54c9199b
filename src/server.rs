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

// The privileged daemon. Connections are served one at a time, and requests
// on a connection in order: two requests never race on the namespace.

use anyhow::{Result, Context};
use std::{
    io::{prelude::*, BufReader, ErrorKind},
    os::unix::{
        fs::PermissionsExt,
        net::{UnixListener, UnixStream},
    },
    path::Path,
    fs,
};
use crate::{
    consts::*,
    protocol::{dispatch, ConnId, Host, Response},
};

/// Creates the listening socket. A stale socket file is replaced. Only our
/// uid may connect.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    match fs::remove_file(socket_path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?,
        _ => {}
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to chmod {}", socket_path.display()))?;

    Ok(listener)
}

fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    stream.write_all(&line)?;
    stream.flush()?;
    Ok(())
}

/// Serves requests until the peer closes the connection, or sends a line
/// longer than `MAX_REQUEST_LEN`.
pub fn handle_connection<H: Host + ?Sized>(stream: UnixStream, host: &mut H, conn: ConnId) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone().context("Failed to clone socket")?);
    let mut writer = stream;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let limit = MAX_REQUEST_LEN as u64 + 1;
        if (&mut reader).take(limit).read_until(b'\n', &mut buf)
            .context("Failed to read request")? == 0 {
            return Ok(());
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() > MAX_REQUEST_LEN {
            // We can't find where the next request starts
            warn!("[{}] Request exceeds {} bytes, closing connection", conn, MAX_REQUEST_LEN);
            return write_response(&mut writer, &Response::ProtocolError)
                .context("Failed to send response");
        }

        let response = dispatch(host, conn, &buf);
        write_response(&mut writer, &response).context("Failed to send response")?;
    }
}

pub struct Server<H> {
    listener: UnixListener,
    host: H,
    next_conn: ConnId,
}

impl<H: Host> Server<H> {
    pub fn new(listener: UnixListener, host: H) -> Self {
        Self { listener, host, next_conn: 1 }
    }

    /// Accepts one connection and serves it to completion. A broken
    /// connection is logged and does not affect the daemon.
    pub fn serve_next(&mut self) -> Result<()> {
        let (stream, _) = self.listener.accept().context("Failed to accept connection")?;
        let conn = self.next_conn;
        self.next_conn += 1;

        debug!("[{}] Connection accepted", conn);
        match handle_connection(stream, &mut self.host, conn) {
            Ok(()) => debug!("[{}] Connection closed", conn),
            Err(e) => warn!("[{}] Connection dropped: {:#}", conn, e),
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            self.serve_next()?;
        }
    }

    pub fn into_host(self) -> H {
        self.host
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{path::PathBuf, thread};
    use nix::mount::MsFlags;
    use crate::protocol::{client::Client, FakeHost};

    fn serve_pair(host: FakeHost) -> Result<(Client, thread::JoinHandle<Result<FakeHost>>)> {
        let (client_end, server_end) = UnixStream::pair()?;
        let server = thread::spawn(move || {
            let mut host = host;
            handle_connection(server_end, &mut host, 1)?;
            Ok(host)
        });
        Ok((Client::from_stream(client_end)?, server))
    }

    fn join(server: thread::JoinHandle<Result<FakeHost>>) -> Result<FakeHost> {
        server.join().map_err(|_| anyhow!("server thread panicked"))?
    }

    #[test]
    fn test_requests_in_sequence() -> Result<()> {
        let (mut client, server) = serve_pair(FakeHost::default())?;

        assert_eq!(client.mount("/data", "/mnt/data", "", 4096, "")?, Response::Ok);
        assert_eq!(client.send_raw(br#"[["MOUNT","/data","/mnt/data","EXTRA"],["","4096",""]]"#)?,
                   Response::ProtocolError);
        // The connection survives a protocol error
        assert_eq!(client.chroot("/var/container")?, Response::Ok);
        drop(client);

        let host = join(server)?;
        assert_eq!(host.mounts.len(), 1);
        assert_eq!(host.mounts[0].source, PathBuf::from("/data"));
        assert_eq!(host.mounts[0].flags, MsFlags::MS_BIND);
        assert_eq!(host.root, Some(PathBuf::from("/var/container")));
        Ok(())
    }

    #[test]
    fn test_garbage_gets_protocol_error() -> Result<()> {
        let (mut client, server) = serve_pair(FakeHost::default())?;

        assert_eq!(client.send_raw(b"")?, Response::ProtocolError);
        assert_eq!(client.send_raw(b"\xff\xfe")?, Response::ProtocolError);
        assert_eq!(client.send_raw(b"[[\"CHROOT\"]]")?, Response::ProtocolError);
        drop(client);

        assert!(!join(server)?.touched());
        Ok(())
    }

    #[test]
    fn test_internal_error_carries_errno() -> Result<()> {
        let host = FakeHost { missing: vec!["/nonexistent".into()], ..Default::default() };
        let (mut client, server) = serve_pair(host)?;

        match client.chroot("/nonexistent")? {
            Response::InternalError { errno, .. } => assert_eq!(errno, libc::ENOENT),
            other => panic!("unexpected response {}", other),
        }
        drop(client);

        join(server)?;
        Ok(())
    }

    #[test]
    fn test_oversized_request_closes_connection() -> Result<()> {
        let (mut client_end, server_end) = UnixStream::pair()?;
        let server = thread::spawn(move || {
            let mut host = FakeHost::default();
            handle_connection(server_end, &mut host, 1)?;
            Ok(host)
        });

        // A request of exactly the maximum size is still read as one line
        let mut line = vec![b'x'; MAX_REQUEST_LEN];
        line.push(b'\n');
        client_end.write_all(&line)?;

        // One byte over, with no newline in sight
        client_end.write_all(&vec![b'['; MAX_REQUEST_LEN + 1])?;

        let mut reader = BufReader::new(client_end);
        let mut responses = String::new();
        reader.read_to_string(&mut responses)?;
        let responses = responses.lines()
            .map(|line| serde_json::from_str(line))
            .collect::<serde_json::Result<Vec<Response>>>()?;
        assert_eq!(responses, vec![Response::ProtocolError, Response::ProtocolError]);

        assert!(!join(server)?.touched());
        Ok(())
    }

    #[test]
    fn test_listener() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("nsguard.sock");
        fs::write(&socket_path, "stale")?;

        let mut server = Server::new(bind(&socket_path)?, FakeHost::default());
        let mode = fs::metadata(&socket_path)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let client = thread::spawn(move || -> Result<Response> {
            Client::connect(&socket_path)?.chroot("/var/container")
        });
        server.serve_next()?;

        let response = client.join().map_err(|_| anyhow!("client thread panicked"))??;
        assert_eq!(response, Response::Ok);
        assert_eq!(server.into_host().root, Some(PathBuf::from("/var/container")));
        Ok(())
    }
}
