//! Fuzz target for ticket document parsing.
//!
//! Feeds arbitrary byte strings to the request and response parsers. Every
//! result must be either `Ok(...)` or `Err(StorageError::Corrupt)`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ticketbroker_storage::{Document, DocumentKind, StorageError, TicketResponse};

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };

    for kind in DocumentKind::ALL {
        match Document::parse(kind, xml, "fuzz") {
            Ok(document) => assert_eq!(document.kind(), kind),
            Err(StorageError::Corrupt { .. }) => {},
            Err(other) => panic!("unexpected error class: {other:?}"),
        }
    }

    // Whatever parses must serialize, and must not change meaning if it
    // parses again.
    if let Ok(response) = TicketResponse::from_xml(xml) {
        let xml = response.to_xml().expect("parsed response must serialize");
        if let Ok(reparsed) = TicketResponse::from_xml(&xml) {
            assert_eq!(reparsed.expiration_time, response.expiration_time);
        }
    }
});
