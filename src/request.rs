// src/request.rs
use std::io::Write;
use std::os::unix::io::RawFd;

use crate::http::Status;
use crate::parser::{self, ParseError};
use crate::slot::RequestSlot;
use crate::syscalls;
use crate::url_map::{Response, UrlMap};

/// Upper bound on buffered request bytes before the engine answers 413 and
/// drops the connection.
const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// Read chunk size for draining an edge-triggered socket.
const READ_CHUNK: usize = 4096;

/// Requests served on one connection before a close is forced.
const MAX_REQUESTS_PER_CONNECTION: u32 = 10_000;

/// How long a stalled send may wait for the kernel buffer to drain.
const WRITE_STALL_MS: libc::c_int = 1000;

/// Service every readable byte on the slot's socket.
///
/// Drains until the socket would block (the reactor is edge-triggered and
/// will not re-report already-buffered data), services each complete
/// pipelined request in arrival order, and records the connection
/// disposition in `is_keep_alive`. Never touches `fd`, `alive` or
/// `time_to_die`, and never frees the response buffer.
pub fn process_request(slot: &mut RequestSlot, url_map: &UrlMap) {
    let fd = slot.fd;
    let mut peer_closed = false;
    let mut overflow = false;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match syscalls::read_nonblocking(fd, &mut chunk) {
            Ok(Some(0)) => {
                peer_closed = true;
                break;
            }
            Ok(Some(n)) => {
                slot.scratch.pending.extend_from_slice(&chunk[..n]);
                if slot.scratch.pending.len() > MAX_REQUEST_SIZE {
                    overflow = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(fd, error = %e, "read failed");
                slot.is_keep_alive = false;
                return;
            }
        }
    }

    if slot.scratch.pending.is_empty() {
        // Spurious wake or bare FIN; nothing to service.
        slot.is_keep_alive = !peer_closed;
        return;
    }

    let mut consumed_total = 0;
    while consumed_total < slot.scratch.pending.len() {
        match parser::parse_request(&slot.scratch.pending[consumed_total..]) {
            Ok((req, consumed)) => {
                slot.response.clear();
                let mut response = Response {
                    mime_type: "text/plain",
                    body: &mut slot.response,
                };
                let status = match url_map.lookup(req.path) {
                    Some(handler) => handler(&req, &mut response),
                    None => {
                        response
                            .body
                            .extend_from_slice(Status::NotFound.reason().as_bytes());
                        Status::NotFound
                    }
                };
                let mime_type = response.mime_type;

                slot.scratch.requests_served += 1;
                let keep_alive = req.wants_keep_alive()
                    && slot.scratch.requests_served < MAX_REQUESTS_PER_CONNECTION;

                send_response(fd, status, mime_type, &slot.response, keep_alive);
                slot.is_keep_alive = keep_alive;
                consumed_total += consumed;
                if !keep_alive {
                    break;
                }
            }
            Err(ParseError::Incomplete) => {
                if peer_closed {
                    // The head will never complete.
                    slot.is_keep_alive = false;
                } else if slot.scratch.pending.len() - consumed_total > MAX_REQUEST_SIZE {
                    respond_error(fd, Status::TooLarge, slot);
                    slot.is_keep_alive = false;
                } else {
                    // Head not complete yet; keep the connection armed and
                    // wait for the next readiness edge.
                    slot.is_keep_alive = true;
                }
                break;
            }
            Err(e) => {
                tracing::debug!(fd, error = ?e, "malformed request");
                let status = match e {
                    ParseError::TooLarge => Status::TooLarge,
                    _ => Status::BadRequest,
                };
                respond_error(fd, status, slot);
                slot.is_keep_alive = false;
                break;
            }
        }
    }

    if consumed_total > 0 {
        slot.scratch.pending.drain(..consumed_total);
    }
    if overflow {
        // The drain loop stopped early; unread bytes may linger in the
        // kernel buffer with no edge to re-report them.
        slot.is_keep_alive = false;
    }
}

fn respond_error(fd: RawFd, status: Status, slot: &mut RequestSlot) {
    slot.response.clear();
    slot.response.extend_from_slice(status.reason().as_bytes());
    send_response(fd, status, "text/plain", &slot.response, false);
}

fn send_response(fd: RawFd, status: Status, mime_type: &str, body: &[u8], keep_alive: bool) {
    let mut head = Vec::with_capacity(128);
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        status.code(),
        status.reason(),
        mime_type,
        body.len(),
        if keep_alive { "keep-alive" } else { "close" }
    );
    write_all(fd, &head, body);
}

/// Push the head and body out with vectored writes. The socket is
/// non-blocking; on a full kernel buffer we poll briefly for writability and
/// otherwise abandon the remainder, leaving the connection to its
/// disposition.
fn write_all(fd: RawFd, mut head: &[u8], mut body: &[u8]) {
    while !head.is_empty() || !body.is_empty() {
        let result = if head.is_empty() {
            syscalls::write_nonblocking(fd, body)
        } else if body.is_empty() {
            syscalls::write_nonblocking(fd, head)
        } else {
            syscalls::writev_nonblocking(fd, &[head, body])
        };
        match result {
            Ok(Some(n)) if n > 0 => {
                let from_head = n.min(head.len());
                head = &head[from_head..];
                let from_body = (n - from_head).min(body.len());
                body = &body[from_body..];
            }
            Ok(_) => {
                if !syscalls::poll_writable(fd, WRITE_STALL_MS).unwrap_or(false) {
                    tracing::debug!(fd, "send stalled, dropping remainder");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(fd, error = %e, "write failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Request;

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let res = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(res, 0);
        (fds[0], fds[1])
    }

    fn send(fd: RawFd, bytes: &[u8]) {
        let res = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        assert_eq!(res, bytes.len() as isize);
    }

    fn recv_available(fd: RawFd) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let res =
                unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
            if res <= 0 {
                break;
            }
            out.extend_from_slice(&chunk[..res as usize]);
        }
        out
    }

    fn hello(_req: &Request, resp: &mut Response) -> Status {
        resp.body.extend_from_slice(b"hello");
        Status::Ok
    }

    fn hello_map() -> UrlMap {
        let mut map = UrlMap::new();
        map.add("/", hello);
        map
    }

    #[test]
    fn serves_request_and_keeps_alive() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        send(client, b"GET / HTTP/1.1\r\nHost: test\r\n\r\n");

        process_request(&mut slot, &hello_map());

        assert!(slot.is_keep_alive);
        assert!(slot.scratch.pending.is_empty());
        let reply = recv_available(client);
        let reply = String::from_utf8_lossy(&reply);
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Connection: keep-alive"));
        assert!(reply.ends_with("hello"));

        syscalls::close_fd(client);
        syscalls::close_fd(server);
    }

    #[test]
    fn connection_close_sets_close_disposition() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        send(client, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");

        process_request(&mut slot, &hello_map());

        assert!(!slot.is_keep_alive);
        let reply = recv_available(client);
        assert!(String::from_utf8_lossy(&reply).contains("Connection: close"));

        syscalls::close_fd(client);
        syscalls::close_fd(server);
    }

    #[test]
    fn partial_head_stays_open_and_buffers() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        send(client, b"GET / HT");

        process_request(&mut slot, &hello_map());

        assert!(slot.is_keep_alive);
        assert_eq!(slot.scratch.pending, b"GET / HT");

        // The rest of the head arrives on a later readiness edge.
        send(client, b"TP/1.1\r\n\r\n");
        process_request(&mut slot, &hello_map());
        assert!(slot.is_keep_alive);
        assert!(slot.scratch.pending.is_empty());
        let reply = recv_available(client);
        assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 200 OK"));

        syscalls::close_fd(client);
        syscalls::close_fd(server);
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        send(client, b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n");

        process_request(&mut slot, &hello_map());

        assert!(!slot.is_keep_alive);
        let reply = recv_available(client);
        assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 400 Bad request"));

        syscalls::close_fd(client);
        syscalls::close_fd(server);
    }

    #[test]
    fn bare_fin_closes_without_response() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        syscalls::close_fd(client);

        process_request(&mut slot, &hello_map());

        assert!(!slot.is_keep_alive);
        syscalls::close_fd(server);
    }

    #[test]
    fn pipelined_requests_all_serviced() {
        let (client, server) = socketpair();
        let mut slot = RequestSlot::with_buffer_capacity(64);
        slot.reset(server);
        send(
            client,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
        );

        process_request(&mut slot, &hello_map());

        assert!(!slot.is_keep_alive);
        let reply = recv_available(client);
        let reply = String::from_utf8_lossy(&reply);
        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2);

        syscalls::close_fd(client);
        syscalls::close_fd(server);
    }
}
