use crate::config::DUMP_READ_BUFFER;
use crate::error::DumpError;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::debug;

/// Opens a dump for streaming, decompressing by extension (`.gz`, `.bz2`, else plain XML).
pub fn open_dump(path: &str) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open dump: {}", path))?;
    let reader: Box<dyn BufRead + Send> = if path.ends_with(".gz") {
        debug!(path, "Opening gzip dump");
        Box::new(BufReader::with_capacity(
            DUMP_READ_BUFFER,
            MultiGzDecoder::new(file),
        ))
    } else if path.ends_with(".bz2") {
        debug!(path, "Opening bzip2 dump");
        Box::new(BufReader::with_capacity(
            DUMP_READ_BUFFER,
            MultiBzDecoder::new(file),
        ))
    } else {
        Box::new(BufReader::with_capacity(DUMP_READ_BUFFER, file))
    };
    Ok(reader)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    End,
}

/// The export elements the accumulator reacts to; everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Page,
    Title,
    Ns,
    Timestamp,
    Ip,
    Username,
    Other,
}

impl Element {
    fn from_local_name(name: &[u8]) -> Self {
        match name {
            b"page" => Element::Page,
            b"title" => Element::Title,
            b"ns" => Element::Ns,
            b"timestamp" => Element::Timestamp,
            b"ip" => Element::Ip,
            b"username" => Element::Username,
            _ => Element::Other,
        }
    }

    /// Only these carry text anyone reads; revision bodies are skipped unbuffered.
    fn captures_text(self) -> bool {
        !matches!(self, Element::Page | Element::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpEvent<'a> {
    pub kind: EventKind,
    pub element: Element,
    /// Unescaped text content; populated on `End` of text-bearing elements only
    pub text: &'a str,
}

enum Raw {
    Open(Element, bool),
    Close(Element),
    Skip,
    Eof,
}

/// Pull parser over a MediaWiki export that never holds more than the
/// current element. Call [`release`](Self::release) once an event has been
/// handled so its bytes and text are dropped before the next read.
pub struct DumpEventParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    text: String,
    capturing: bool,
    depth: usize,
    pending_end: Option<Element>,
}

impl DumpEventParser<Box<dyn BufRead + Send>> {
    pub fn from_path(path: &str) -> Result<Self> {
        Ok(Self::new(open_dump(path)?))
    }
}

impl<R: BufRead> DumpEventParser<R> {
    pub fn new(input: R) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.check_end_names(true);
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            text: String::new(),
            capturing: false,
            depth: 0,
            pending_end: None,
        }
    }

    /// Byte offset into the decompressed stream.
    pub fn buffer_position(&self) -> usize {
        self.reader.buffer_position()
    }

    /// Drops everything retained for the last delivered event.
    pub fn release(&mut self) {
        self.buf.clear();
        self.text.clear();
    }

    pub fn next_event(&mut self) -> Result<Option<DumpEvent<'_>>, DumpError> {
        // Self-closing elements produce their End on the following call
        if let Some(element) = self.pending_end.take() {
            return Ok(Some(DumpEvent {
                kind: EventKind::End,
                element,
                text: "",
            }));
        }

        loop {
            let offset = self.reader.buffer_position();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|source| DumpError::from_reader(offset, source))?;

            let raw = match event {
                Event::Start(e) => Raw::Open(Element::from_local_name(e.local_name().as_ref()), false),
                Event::Empty(e) => Raw::Open(Element::from_local_name(e.local_name().as_ref()), true),
                Event::End(e) => Raw::Close(Element::from_local_name(e.local_name().as_ref())),
                Event::Text(e) if self.capturing => {
                    let text = e
                        .unescape()
                        .map_err(|source| DumpError::from_reader(offset, source))?;
                    self.text.push_str(&text);
                    Raw::Skip
                }
                Event::CData(e) if self.capturing => {
                    self.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    Raw::Skip
                }
                Event::Eof => Raw::Eof,
                _ => Raw::Skip,
            };

            match raw {
                Raw::Skip => self.buf.clear(),
                Raw::Open(element, empty) => {
                    self.text.clear();
                    if empty {
                        self.pending_end = Some(element);
                    } else {
                        self.depth += 1;
                        self.capturing = element.captures_text();
                    }
                    return Ok(Some(DumpEvent {
                        kind: EventKind::Start,
                        element,
                        text: "",
                    }));
                }
                Raw::Close(element) => {
                    self.depth = self.depth.saturating_sub(1);
                    self.capturing = false;
                    let text = if element.captures_text() {
                        self.text.as_str()
                    } else {
                        ""
                    };
                    return Ok(Some(DumpEvent {
                        kind: EventKind::End,
                        element,
                        text,
                    }));
                }
                Raw::Eof => {
                    if self.depth > 0 {
                        return Err(DumpError::UnexpectedEof {
                            offset: self.reader.buffer_position(),
                            open: self.depth,
                        });
                    }
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(xml: &str) -> Result<Vec<(EventKind, Element, String)>, DumpError> {
        let mut parser = DumpEventParser::new(xml.as_bytes());
        let mut out = Vec::new();
        while let Some(event) = parser.next_event()? {
            out.push((event.kind, event.element, event.text.to_string()));
            parser.release();
        }
        Ok(out)
    }

    #[test]
    fn emits_start_and_end_in_document_order() {
        let events = collect("<page><title>Rust</title><ns>0</ns></page>").unwrap();
        assert_eq!(
            events,
            vec![
                (EventKind::Start, Element::Page, String::new()),
                (EventKind::Start, Element::Title, String::new()),
                (EventKind::End, Element::Title, "Rust".to_string()),
                (EventKind::Start, Element::Ns, String::new()),
                (EventKind::End, Element::Ns, "0".to_string()),
                (EventKind::End, Element::Page, String::new()),
            ]
        );
    }

    #[test]
    fn unescapes_entities() {
        let events = collect("<title>AT&amp;T &lt;corp&gt;</title>").unwrap();
        assert_eq!(events[1].2, "AT&T <corp>");
    }

    #[test]
    fn cdata_is_kept_verbatim() {
        let events = collect("<username><![CDATA[A&B]]></username>").unwrap();
        assert_eq!(events[1].2, "A&B");
    }

    #[test]
    fn self_closing_element_yields_start_and_end() {
        let events = collect("<revision><minor/></revision>").unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], (EventKind::Start, Element::Other, String::new()));
        assert_eq!(events[2], (EventKind::End, Element::Other, String::new()));
    }

    #[test]
    fn unknown_elements_are_other_and_text_not_captured() {
        let events = collect("<text bytes=\"5\">hello</text>").unwrap();
        assert_eq!(events[0].1, Element::Other);
        assert_eq!(events[1], (EventKind::End, Element::Other, String::new()));
    }

    #[test]
    fn namespace_prefix_is_ignored() {
        let xml = r#"<mw:page xmlns:mw="http://www.mediawiki.org/xml/export-0.10/"><mw:ns>0</mw:ns></mw:page>"#;
        let events = collect(xml).unwrap();
        assert_eq!(events[0].1, Element::Page);
        assert_eq!(events[2], (EventKind::End, Element::Ns, "0".to_string()));
    }

    #[test]
    fn contributor_children_are_recognized() {
        let xml = "<contributor><ip>1.2.3.4</ip></contributor><contributor><username>Ann</username><id>7</id></contributor>";
        let events = collect(xml).unwrap();
        assert!(events.contains(&(EventKind::End, Element::Ip, "1.2.3.4".to_string())));
        assert!(events.contains(&(EventKind::End, Element::Username, "Ann".to_string())));
    }

    #[test]
    fn mismatched_end_tag_is_parse_error() {
        let err = collect("<page><title>x</page>").unwrap_err();
        assert!(matches!(err, DumpError::Parse { .. }));
        assert!(err.offset() > 0);
    }

    struct FailingReader {
        data: &'static [u8],
        served: bool,
    }

    impl std::io::Read for FailingReader {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::other("corrupt stream"));
            }
            self.served = true;
            out[..self.data.len()].copy_from_slice(self.data);
            Ok(self.data.len())
        }
    }

    #[test]
    fn read_failure_is_io_error() {
        let input = BufReader::new(FailingReader {
            data: b"<mediawiki><page><title>x</title>",
            served: false,
        });
        let mut parser = DumpEventParser::new(input);
        let err = loop {
            match parser.next_event() {
                Ok(Some(_)) => parser.release(),
                Ok(None) => panic!("stream should fail before EOF"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, DumpError::Io { .. }));
    }

    #[test]
    fn truncated_document_is_error() {
        let err = collect("<mediawiki><page><title>x</title>").unwrap_err();
        assert!(matches!(err, DumpError::UnexpectedEof { open: 2, .. }));
    }

    #[test]
    fn empty_input_yields_no_events() {
        assert!(collect("").unwrap().is_empty());
    }

    #[test]
    fn release_clears_retained_buffers() {
        let mut parser = DumpEventParser::new("<title>abc</title>".as_bytes());
        parser.next_event().unwrap();
        parser.release();
        let event = parser.next_event().unwrap().unwrap();
        assert_eq!(event.text, "abc");
        parser.release();
        assert!(parser.text.is_empty());
        assert!(parser.buf.is_empty());
    }

    #[test]
    fn open_dump_missing_file_errors() {
        let result = open_dump("/nonexistent/dump.xml.gz");
        assert!(result.is_err());
    }
}
