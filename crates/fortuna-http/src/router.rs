//! Request routing and the two handlers.
//!
//! Each worker owns a `Router`; the listing handler's record buffer is kept
//! between requests so steady-state routing does not allocate.

use std::sync::Arc;

use fortuna_core::Result;
use fortuna_store::{Fortune, RecordStore, FIRST_ID};

use crate::parser::Request;
use crate::response::{Response, Status, TEXT_HTML, TEXT_PLAIN};

pub const PLAINTEXT_BODY: &str = "Hello, world!\n";

/// Message of the row appended to every listing at request time.
pub const REQUEST_TIME_MESSAGE: &str = "Additional fortune added at request time.";

pub struct Router {
    store: Arc<RecordStore<Fortune>>,
    listing_cap: usize,
    fortunes: Vec<Fortune>,
}

impl Router {
    pub fn new(store: Arc<RecordStore<Fortune>>, listing_cap: usize) -> Self {
        let listing_cap = listing_cap.max(1);
        Self {
            store,
            listing_cap,
            fortunes: Vec::with_capacity(listing_cap + 1),
        }
    }

    /// Fill `resp` for `req`.
    pub fn route(&mut self, req: &Request<'_>, resp: &mut Response) {
        resp.reset();
        let handler: fn(&mut Self, &mut Response) = match req.path {
            "/plaintext" => Self::plaintext,
            "/fortunes" => Self::fortunes,
            _ => {
                resp.error(Status::NotFound);
                return;
            }
        };
        if req.method != "GET" {
            resp.error(Status::MethodNotAllowed);
            resp.allow = Some("GET");
            return;
        }
        handler(self, resp);
    }

    fn plaintext(&mut self, resp: &mut Response) {
        resp.content_type = TEXT_PLAIN;
        resp.write_str(PLAINTEXT_BODY);
    }

    fn fortunes(&mut self, resp: &mut Response) {
        if let Err(e) = self.load_fortunes() {
            tracing::error!(error = %e, "failed to read fortunes");
            resp.error(Status::InternalServerError);
            return;
        }
        resp.content_type = TEXT_HTML;
        resp.write_str(
            "<!DOCTYPE html><html><head><title>Fortunes</title></head><body>\
             <table><tr><th>id</th><th>message</th></tr>",
        );
        for fortune in &self.fortunes {
            resp.write_str("<tr><td>");
            resp.write_str(itoa(fortune.id(), &mut [0u8; 20]));
            resp.write_str("</td><td>");
            resp.write_html_escaped(fortune.message_bytes());
            resp.write_str("</td></tr>");
        }
        resp.write_str("</table></body></html>");
    }

    /// Stored records (up to the cap) plus the request-time row, sorted by
    /// message bytes.
    fn load_fortunes(&mut self) -> Result<()> {
        self.fortunes.clear();
        self.fortunes.resize(self.listing_cap, Fortune::default());

        let mut cursor = FIRST_ID;
        let mut count = 0;
        while count < self.listing_cap {
            let n = self.store.read_many(&mut cursor, &mut self.fortunes[count..])?;
            if n == 0 {
                break;
            }
            count += n;
        }
        self.fortunes.truncate(count);
        self.fortunes
            .push(Fortune::new(count as u64, REQUEST_TIME_MESSAGE)?);
        self.fortunes
            .sort_by(|a, b| a.message_bytes().cmp(b.message_bytes()));
        Ok(())
    }
}

/// Decimal rendering into a stack buffer.
fn itoa(mut n: u64, buf: &mut [u8; 20]) -> &str {
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    std::str::from_utf8(&buf[i..]).unwrap_or("0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_request;
    use fortuna_store::{seed, FORTUNES, HEADER_SIZE};

    fn router_with(messages: &[&str], cap: usize) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("router.db")).unwrap();
        seed(&store, messages).unwrap();
        (dir, Router::new(Arc::new(store), cap))
    }

    fn route(router: &mut Router, raw: &[u8]) -> Response {
        let (req, _) = parse_request(raw).unwrap().unwrap();
        let mut resp = Response::new();
        router.route(&req, &mut resp);
        resp
    }

    fn body(resp: &Response) -> String {
        String::from_utf8(resp.body.clone()).unwrap()
    }

    #[test]
    fn test_itoa() {
        assert_eq!(itoa(0, &mut [0u8; 20]), "0");
        assert_eq!(itoa(12, &mut [0u8; 20]), "12");
        assert_eq!(itoa(u64::MAX, &mut [0u8; 20]), "18446744073709551615");
    }

    #[test]
    fn test_plaintext() {
        let (_dir, mut router) = router_with(&[], 12);
        let resp = route(&mut router, b"GET /plaintext HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.content_type, TEXT_PLAIN);
        assert_eq!(body(&resp), "Hello, world!\n");
    }

    #[test]
    fn test_plaintext_does_not_read_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        let store: RecordStore<Fortune> = RecordStore::open(&path).unwrap();
        seed(&store, &["only"]).unwrap();

        // Point the slot's message span far outside its data area.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        std::os::unix::fs::FileExt::write_all_at(&file, &[0xFF; 8], HEADER_SIZE + 8).unwrap();

        let mut router = Router::new(Arc::new(store), 12);
        let resp = route(&mut router, b"GET /fortunes HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::InternalServerError);

        let resp = route(&mut router, b"GET /plaintext HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(body(&resp), PLAINTEXT_BODY);
    }

    #[test]
    fn test_unknown_path_and_method() {
        let (_dir, mut router) = router_with(&[], 12);
        let resp = route(&mut router, b"GET /nope HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::NotFound);

        let resp = route(&mut router, b"POST /plaintext HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::MethodNotAllowed);
        assert_eq!(resp.allow, Some("GET"));
    }

    #[test]
    fn test_query_is_ignored() {
        let (_dir, mut router) = router_with(&[], 12);
        let resp = route(&mut router, b"GET /plaintext?a=b HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::Ok);
    }

    #[test]
    fn test_fortunes_sorted_escaped_with_request_time_row() {
        let (_dir, mut router) = router_with(&FORTUNES, 12);
        let resp = route(&mut router, b"GET /fortunes HTTP/1.1\r\n\r\n");
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.content_type, TEXT_HTML);

        let html = body(&resp);
        assert_eq!(html.matches("<tr><td>").count(), 13);
        assert!(html.contains("<tr><td>12</td><td>Additional fortune added at request time.</td></tr>"));
        assert!(html.contains("&lt;script&gt;alert(&quot;This should not be displayed"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("フレームワークのベンチマーク"));

        let mut sorted: Vec<&str> = FORTUNES.to_vec();
        sorted.push(REQUEST_TIME_MESSAGE);
        sorted.sort();
        let script_row = html.find("<tr><td>10</td>").unwrap();
        let extra_row = html.find("<tr><td>12</td>").unwrap();
        let japanese_row = html.find("<tr><td>11</td>").unwrap();
        assert!(script_row < extra_row && extra_row < japanese_row);
        assert_eq!(sorted[0], FORTUNES[10]);
        assert_eq!(sorted[12], FORTUNES[11]);
        assert_eq!(router.fortunes[0].id(), 10);
        assert_eq!(router.fortunes[12].id(), 11);
        let msgs: Vec<&str> = router.fortunes.iter().map(|f| f.message()).collect();
        assert_eq!(msgs, sorted);
    }

    #[test]
    fn test_listing_cap_limits_rows() {
        let (_dir, mut router) = router_with(&FORTUNES, 4);
        let resp = route(&mut router, b"GET /fortunes HTTP/1.1\r\n\r\n");
        let html = body(&resp);
        assert_eq!(html.matches("<tr><td>").count(), 5);
        assert!(html.contains("<tr><td>4</td><td>Additional fortune"));
    }

    #[test]
    fn test_empty_store_lists_only_request_time_row() {
        let (_dir, mut router) = router_with(&[], 12);
        let resp = route(&mut router, b"GET /fortunes HTTP/1.1\r\n\r\n");
        let html = body(&resp);
        assert_eq!(html.matches("<tr><td>").count(), 1);
        assert!(html.contains("<tr><td>0</td><td>Additional fortune"));
    }
}
