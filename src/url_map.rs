// src/url_map.rs
use crate::http::Status;
use crate::parser::Request;

/// Handler invoked for requests under a registered prefix. Appends the body
/// to the slot's reusable response buffer and reports a status.
pub type Handler = fn(&Request, &mut Response) -> Status;

/// Response assembly surface handed to a route handler. `body` is the
/// connection's reusable buffer; handlers append to it and set the content
/// type.
pub struct Response<'a> {
    pub mime_type: &'static str,
    pub body: &'a mut Vec<u8>,
}

#[derive(Default)]
struct TrieNode {
    children: Vec<(u8, TrieNode)>,
    handler: Option<Handler>,
}

/// Byte-wise prefix trie mapping URL prefixes to handlers; the longest
/// registered prefix of a path wins.
#[derive(Default)]
pub struct UrlMap {
    root: TrieNode,
}

impl UrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefix: &str, handler: Handler) {
        let mut node = &mut self.root;
        for &byte in prefix.as_bytes() {
            let pos = match node.children.iter().position(|(b, _)| *b == byte) {
                Some(pos) => pos,
                None => {
                    node.children.push((byte, TrieNode::default()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[pos].1;
        }
        node.handler = Some(handler);
    }

    /// Handler for the longest registered prefix of `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<Handler> {
        let mut node = &self.root;
        let mut best = node.handler;
        for &byte in path.as_bytes() {
            match node.children.iter().find(|(b, _)| *b == byte) {
                Some((_, child)) => {
                    if child.handler.is_some() {
                        best = child.handler;
                    }
                    node = child;
                }
                None => break,
            }
        }
        best
    }
}
