//! PDF document reader: xref chains, object resolution, page tree

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace, warn};

use crate::error::{PDFImportError, PDFImportResult};

use super::filter::{apply_predictor, flate_decode};
use super::lexer::Lexer;
use super::value::{parse_value, read_value, Dictionary, Value};
use super::xref::{read_be, XRefTable};

/// The page boxes a page may carry, in fallback-policy order
pub const AVAILABLE_BOXES: [&str; 5] = [
    "/MediaBox",
    "/CropBox",
    "/BleedBox",
    "/TrimBox",
    "/ArtBox",
];

// Guards against reference cycles in /Parent chains and /Kids trees.
const MAX_TREE_DEPTH: usize = 64;

/// Derived page box geometry.
///
/// `x`/`y`/`w`/`h` are scaled by the import scale `k`; the corner fields keep
/// the unscaled min/max of the source array.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

/// Reader for one source PDF.
///
/// The source is slurped into memory and parsed with positioned lexers over
/// the byte slice, so resolving a reference while another object is being
/// read (an indirect `/Length`, say) never disturbs the outer parse.
#[derive(Debug)]
pub struct PDFReader {
    data: Vec<u8>,
    source_file: String,
    xref: XRefTable,
    trailer: Option<Value>,
    catalog: Option<Value>,
    pages: Vec<Value>,
    page_count: i64,
    already_read: bool,
}

impl PDFReader {
    /// Open and read a source PDF from a file path
    pub fn from_file(path: &str) -> PDFImportResult<Self> {
        debug!("opening source pdf {path}");
        let data = fs::read(path)?;
        Self::from_bytes(path.to_string(), data)
    }

    /// Read a source PDF from a seekable stream, under a caller-chosen name
    pub fn from_stream<R: Read + Seek>(source_name: &str, mut rs: R) -> PDFImportResult<Self> {
        rs.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        rs.read_to_end(&mut data)?;
        Self::from_bytes(source_name.to_string(), data)
    }

    fn from_bytes(source_file: String, data: Vec<u8>) -> PDFImportResult<Self> {
        let mut reader = Self {
            data,
            source_file,
            xref: XRefTable::new(),
            trailer: None,
            catalog: None,
            pages: Vec::new(),
            page_count: 0,
            already_read: false,
        };
        reader.read()?;
        Ok(reader)
    }

    /// Canonical name of the source (path, or the synthetic stream key)
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    /// Parse the document structure. Idempotent: later calls return
    /// immediately.
    pub fn read(&mut self) -> PDFImportResult<()> {
        if self.already_read {
            return Ok(());
        }

        debug!("reading pdf structure of {}", self.source_file);

        let startxref = self.find_startxref()?;
        self.read_xref_chain(startxref).map_err(|e| match e {
            PDFImportError::Parse(msg) => {
                PDFImportError::Parse(format!("failed to read xref chain: {msg}"))
            }
            other => other,
        })?;
        self.read_root()?;
        self.read_pages().map_err(|e| match e {
            PDFImportError::Parse(msg) => {
                PDFImportError::Parse(format!("failed to read pages: {msg}"))
            }
            other => other,
        })?;

        self.already_read = true;
        Ok(())
    }

    // The last startxref in the trailing window points at the newest xref
    // section.
    fn find_startxref(&self) -> PDFImportResult<usize> {
        let tail_start = self.data.len().saturating_sub(1500);
        let marker = b"startxref";
        let hit = self.data[tail_start..]
            .windows(marker.len())
            .rposition(|w| w == marker)
            .ok_or_else(|| PDFImportError::parse("startxref not found"))?;

        let mut lexer = Lexer::at(&self.data, tail_start + hit);
        let token = lexer.read_token();
        if token != "startxref" {
            return Err(PDFImportError::parse("malformed startxref marker"));
        }
        let offset = lexer.read_token();
        offset
            .parse::<usize>()
            .map_err(|_| PDFImportError::parse(format!("invalid startxref offset: {offset}")))
    }

    fn read_xref_chain(&mut self, start: usize) -> PDFImportResult<()> {
        let mut pos = start;
        loop {
            trace!("reading xref section at offset {pos}");
            if pos >= self.data.len() {
                return Err(PDFImportError::parse(format!(
                    "xref offset {pos} is outside the document"
                )));
            }

            let mut lexer = Lexer::at(&self.data, pos);
            let token = lexer.read_token();
            let prev = if token == "xref" {
                Self::read_classic_section(&mut lexer, &mut self.xref, &mut self.trailer)?
            } else {
                let head = parse_value(&mut lexer, &token)?;
                match head {
                    Value::ObjectDecl { .. } => read_xref_stream(
                        &self.data,
                        &mut lexer,
                        &mut self.xref,
                        &mut self.trailer,
                    )?,
                    _ => {
                        return Err(PDFImportError::parse(format!(
                            "expected xref table or xref stream, got: {token}"
                        )))
                    }
                }
            };

            match prev {
                Some(p) => pos = p,
                None => break,
            }
        }
        Ok(())
    }

    // Classic table: subsections of `start count` headers followed by
    // 20-byte-style `offset gen status` entries, then the trailer dictionary.
    fn read_classic_section(
        lexer: &mut Lexer,
        xref: &mut XRefTable,
        trailer: &mut Option<Value>,
    ) -> PDFImportResult<Option<usize>> {
        loop {
            let token = lexer.read_token();
            if token.is_empty() {
                return Err(PDFImportError::parse("unexpected end of xref table"));
            }
            if token == "trailer" {
                break;
            }

            let start: i64 = token
                .parse()
                .map_err(|_| PDFImportError::parse(format!("invalid xref start object: {token}")))?;
            let count_token = lexer.read_token();
            let count: i64 = count_token.parse().map_err(|_| {
                PDFImportError::parse(format!("invalid xref object count: {count_token}"))
            })?;

            for i in 0..count {
                let offset_token = lexer.read_token();
                let offset: u64 = offset_token.parse().map_err(|_| {
                    PDFImportError::parse(format!("invalid xref offset: {offset_token}"))
                })?;
                let gen_token = lexer.read_token();
                let gen: i64 = gen_token.parse().map_err(|_| {
                    PDFImportError::parse(format!("invalid xref generation: {gen_token}"))
                })?;
                let status = lexer.read_token();
                match status.as_str() {
                    "n" => xref.insert_classic(start + i, gen, offset),
                    "f" => {}
                    _ => {
                        return Err(PDFImportError::parse(format!(
                            "expected xref status n or f, got: {status}"
                        )))
                    }
                }
            }
        }

        let section_trailer = read_value(lexer)
            .map_err(|e| PDFImportError::parse(format!("failed to read trailer: {e}")))?;

        let prev = section_trailer
            .get("/Prev")
            .and_then(Value::as_integer)
            .map(|n| n as usize);

        // The newest trailer carrying /Root wins.
        if section_trailer.get("/Root").is_some() && trailer.is_none() {
            *trailer = Some(section_trailer);
        }

        Ok(prev)
    }

    fn read_root(&mut self) -> PDFImportResult<()> {
        let root = self
            .trailer
            .as_ref()
            .and_then(|t| t.get("/Root"))
            .cloned()
            .ok_or_else(|| PDFImportError::parse("no trailer with /Root found"))?;

        let catalog = self.resolve_object(&root).map_err(|e| match e {
            PDFImportError::Parse(msg) => {
                PDFImportError::Parse(format!("failed to resolve root object: {msg}"))
            }
            other => other,
        })?;
        self.catalog = Some(catalog);
        Ok(())
    }

    fn read_pages(&mut self) -> PDFImportResult<()> {
        let catalog = self
            .catalog
            .clone()
            .ok_or_else(|| PDFImportError::parse("catalog has not been read"))?;

        let pages_ref = catalog
            .get("/Pages")
            .ok_or_else(|| PDFImportError::parse("catalog missing /Pages"))?;
        let pages_node = self.resolve_object(pages_ref)?;

        let kids_ref = pages_node
            .get("/Kids")
            .ok_or_else(|| PDFImportError::parse("page tree missing /Kids"))?;
        let kids = self.resolve_object(kids_ref)?;

        let count_ref = pages_node
            .get("/Count")
            .ok_or_else(|| PDFImportError::parse("page tree missing /Count"))?;
        let count = self
            .resolve_object(count_ref)?
            .unwrap_object()
            .as_integer()
            .ok_or_else(|| PDFImportError::parse("page tree /Count is not an integer"))?;

        self.page_count = count;
        let mut pages = Vec::with_capacity(count.max(0) as usize);
        self.collect_kids(&kids, &mut pages, 0)?;

        if pages.len() as i64 != count {
            return Err(PDFImportError::page(format!(
                "page tree /Count is {count} but {} pages were found",
                pages.len()
            )));
        }

        self.pages = pages;
        Ok(())
    }

    fn collect_kids(
        &self,
        kids: &Value,
        pages: &mut Vec<Value>,
        depth: usize,
    ) -> PDFImportResult<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFImportError::page("page tree nesting too deep"));
        }

        let entries = match kids.unwrap_object() {
            Value::Array(entries) => entries.clone(),
            _ => return Err(PDFImportError::parse("/Kids is not an array")),
        };

        for kid in &entries {
            let node = self
                .resolve_object(kid)
                .map_err(|e| PDFImportError::parse(format!("failed to resolve kids: {e}")))?;
            let node_type = node
                .get("/Type")
                .and_then(Value::as_name)
                .ok_or_else(|| PDFImportError::parse("page tree node missing /Type"))?
                .to_string();

            match node_type.as_str() {
                "/Page" => {
                    if pages.len() as i64 >= self.page_count {
                        return Err(PDFImportError::page(format!(
                            "page tree holds more pages than /Count {}",
                            self.page_count
                        )));
                    }
                    pages.push(node);
                }
                "/Pages" => {
                    let sub_kids_ref = node
                        .get("/Kids")
                        .ok_or_else(|| PDFImportError::parse("/Pages node missing /Kids"))?
                        .clone();
                    let sub_kids = self.resolve_object(&sub_kids_ref)?;
                    self.collect_kids(&sub_kids, pages, depth + 1)?;
                }
                other => {
                    return Err(PDFImportError::parse(format!(
                        "unknown page tree node type {other}, expected /Page or /Pages"
                    )))
                }
            }
        }

        Ok(())
    }

    /// Resolve an indirect reference to its materialized object. Any other
    /// value passes through unchanged.
    pub fn resolve_object(&self, spec: &Value) -> PDFImportResult<Value> {
        match spec {
            Value::IndirectRef { id, gen } => resolve_ref(&self.data, &self.xref, *id, *gen),
            other => Ok(other.clone()),
        }
    }

    fn page_object(&self, pageno: usize) -> PDFImportResult<&Value> {
        if pageno < 1 || pageno > self.pages.len() {
            return Err(PDFImportError::page(format!("page {pageno} does not exist")));
        }
        Ok(&self.pages[pageno - 1])
    }

    /// Number of pages in the document
    pub fn get_num_pages(&self) -> PDFImportResult<i64> {
        if self.page_count == 0 {
            return Err(PDFImportError::page("document has no pages"));
        }
        Ok(self.page_count)
    }

    /// All boxes of all pages, scaled by `k`, keyed by 1-based page number
    pub fn get_all_page_boxes(
        &self,
        k: f64,
    ) -> PDFImportResult<BTreeMap<usize, BTreeMap<String, Rect>>> {
        let mut result = BTreeMap::new();
        for pageno in 1..=self.pages.len() {
            result.insert(pageno, self.get_page_boxes(pageno, k)?);
        }
        Ok(result)
    }

    /// The boxes actually present on a page (directly or inherited)
    pub fn get_page_boxes(
        &self,
        pageno: usize,
        k: f64,
    ) -> PDFImportResult<BTreeMap<String, Rect>> {
        let page = self.page_object(pageno)?;
        let mut result = BTreeMap::new();
        for name in AVAILABLE_BOXES {
            if let Some(rect) = self.get_page_box(page, name, k, 0)? {
                result.insert(name.to_string(), rect);
            }
        }
        Ok(result)
    }

    // A box missing from the page and its whole /Parent chain is absent, not
    // an error; the import-time fallback policy decides what that means.
    fn get_page_box(
        &self,
        node: &Value,
        box_name: &str,
        k: f64,
        depth: usize,
    ) -> PDFImportResult<Option<Rect>> {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFImportError::page("/Parent chain too deep"));
        }

        if let Some(entry) = node.get(box_name) {
            let entry = self.resolve_object(entry)?;
            let values = match entry.unwrap_object() {
                Value::Array(items) if items.len() >= 4 => {
                    let mut values = [0.0f64; 4];
                    for (slot, item) in values.iter_mut().zip(items) {
                        *slot = item.as_real().ok_or_else(|| {
                            PDFImportError::parse(format!("{box_name} holds a non-numeric entry"))
                        })?;
                    }
                    values
                }
                _ => {
                    return Err(PDFImportError::parse(format!(
                        "{box_name} is not a four-element array"
                    )))
                }
            };

            let [a, b, c, d] = values;
            return Ok(Some(Rect {
                x: a / k,
                y: b / k,
                w: (a - c).abs() / k,
                h: (b - d).abs() / k,
                llx: a.min(c),
                lly: b.min(d),
                urx: a.max(c),
                ury: b.max(d),
            }));
        }

        if let Some(parent) = node.get("/Parent") {
            let parent = self.resolve_object(parent)?;
            return self.get_page_box(&parent, box_name, k, depth + 1);
        }

        Ok(None)
    }

    /// The page's resource dictionary, inherited through `/Parent` if
    /// necessary; empty if the whole chain carries none
    pub fn get_page_resources(&self, pageno: usize) -> PDFImportResult<Value> {
        let page = self.page_object(pageno)?.clone();
        self.resources_of(&page, 0)
    }

    fn resources_of(&self, node: &Value, depth: usize) -> PDFImportResult<Value> {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFImportError::page("/Parent chain too deep"));
        }

        if let Some(res) = node.get("/Resources") {
            let res = self.resolve_object(res).map_err(|e| {
                PDFImportError::parse(format!("failed to resolve resources: {e}"))
            })?;
            return Ok(res.unwrap_object().clone());
        }

        if let Some(parent) = node.get("/Parent") {
            let parent = self.resolve_object(parent)?;
            return self.resources_of(&parent, depth + 1);
        }

        Ok(Value::Dictionary(Dictionary::new()))
    }

    /// The page's `/Rotate` value, inherited through `/Parent`; 0 if absent
    pub fn get_page_rotation(&self, pageno: usize) -> PDFImportResult<i64> {
        let page = self.page_object(pageno)?.clone();
        self.rotation_of(&page, 0)
    }

    fn rotation_of(&self, node: &Value, depth: usize) -> PDFImportResult<i64> {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFImportError::page("/Parent chain too deep"));
        }

        if let Some(rot) = node.get("/Rotate") {
            let rot = self.resolve_object(rot)?;
            return rot
                .unwrap_object()
                .as_integer()
                .ok_or_else(|| PDFImportError::parse("/Rotate is not an integer"));
        }

        if let Some(parent) = node.get("/Parent") {
            let parent = self.resolve_object(parent)?;
            return self.rotation_of(&parent, depth + 1);
        }

        Ok(0)
    }

    /// Decoded drawing instructions of a page: all `/Contents` streams,
    /// filter-decoded and joined with separating newlines
    pub fn get_content(&self, pageno: usize) -> PDFImportResult<Vec<u8>> {
        let page = self.page_object(pageno)?.clone();
        let mut buffer = Vec::new();

        if let Some(contents) = page.get("/Contents") {
            let mut streams = Vec::new();
            self.collect_content_streams(contents, &mut streams, 0)?;

            for (i, stream) in streams.iter().enumerate() {
                let decoded = self.decode_content_stream(stream)?;
                // A separating newline keeps tokens from merging across
                // content chunks.
                if i > 0 {
                    buffer.push(b'\n');
                }
                buffer.extend_from_slice(&decoded);
            }
        }

        Ok(buffer)
    }

    fn collect_content_streams(
        &self,
        spec: &Value,
        out: &mut Vec<Value>,
        depth: usize,
    ) -> PDFImportResult<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFImportError::parse("/Contents nesting too deep"));
        }

        match spec {
            Value::IndirectRef { .. } => {
                let resolved = self.resolve_object(spec).map_err(|e| {
                    PDFImportError::parse(format!("failed to resolve content stream: {e}"))
                })?;
                match resolved.unwrap_object() {
                    Value::Stream { .. } => out.push(resolved),
                    Value::Array(items) => {
                        for item in items.clone() {
                            self.collect_content_streams(&item, out, depth + 1)?;
                        }
                    }
                    _ => {
                        return Err(PDFImportError::parse(
                            "/Contents entry is neither a stream nor an array",
                        ))
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.collect_content_streams(item, out, depth + 1)?;
                }
            }
            _ => {
                return Err(PDFImportError::parse(
                    "/Contents is neither a reference nor an array",
                ))
            }
        }

        Ok(())
    }

    // Apply the stream's /Filter chain left to right. Only /FlateDecode is
    // supported.
    fn decode_content_stream(&self, obj: &Value) -> PDFImportResult<Vec<u8>> {
        let (dict, bytes) = match obj.unwrap_object() {
            Value::Stream { dict, bytes } => (dict, bytes),
            _ => return Err(PDFImportError::parse("content entry is not a stream")),
        };

        let mut filters = Vec::new();
        if let Some(filter) = dict.get("/Filter") {
            let filter = self.resolve_object(filter)?;
            match filter.unwrap_object() {
                Value::Name(name) => filters.push(name.clone()),
                Value::Array(items) => {
                    for item in items {
                        match item {
                            Value::Name(name) => filters.push(name.clone()),
                            _ => {
                                return Err(PDFImportError::parse(
                                    "/Filter array holds a non-name entry",
                                ))
                            }
                        }
                    }
                }
                _ => return Err(PDFImportError::parse("/Filter is neither name nor array")),
            }
        }

        let mut data = bytes.clone();
        for filter in &filters {
            match filter.as_str() {
                "/FlateDecode" => data = flate_decode(&data)?,
                other => {
                    return Err(PDFImportError::unsupported(format!(
                        "content stream filter {other}"
                    )))
                }
            }
        }

        Ok(data)
    }
}

// Resolve the byte length of a stream; /Length may itself be indirect.
fn stream_length(data: &[u8], xref: &XRefTable, dict: &Dictionary) -> PDFImportResult<usize> {
    let length = dict
        .get("/Length")
        .ok_or_else(|| PDFImportError::parse("stream missing /Length"))?;

    let n = match length {
        Value::Integer(n) => *n,
        Value::IndirectRef { id, gen } => resolve_ref(data, xref, *id, *gen)
            .map_err(|e| {
                PDFImportError::parse(format!("failed to resolve stream length: {e}"))
            })?
            .unwrap_object()
            .as_integer()
            .ok_or_else(|| PDFImportError::parse("indirect /Length is not an integer"))?,
        _ => return Err(PDFImportError::parse("/Length is not an integer")),
    };

    usize::try_from(n).map_err(|_| PDFImportError::parse(format!("invalid stream length: {n}")))
}

// Resolve `id gen R` against the xref maps, materializing the object.
fn resolve_ref(data: &[u8], xref: &XRefTable, id: i64, gen: i64) -> PDFImportResult<Value> {
    if xref.has_classic(id) {
        let offset = xref
            .offset_of(id, gen)
            .ok_or(PDFImportError::Reference(id))?;

        let mut lexer = Lexer::at(data, offset as usize);
        let decl = read_value(&mut lexer)
            .map_err(|e| PDFImportError::parse(format!("failed to read object header: {e}")))?;
        match decl {
            Value::ObjectDecl {
                id: decl_id,
                gen: decl_gen,
            } => {
                if decl_id != id || decl_gen != gen {
                    return Err(PDFImportError::parse(format!(
                        "object declaration {decl_id} {decl_gen} does not match reference {id} {gen}"
                    )));
                }
            }
            _ => {
                return Err(PDFImportError::parse(format!(
                    "expected object declaration for {id} {gen}"
                )))
            }
        }

        let value = read_value(&mut lexer)
            .map_err(|e| PDFImportError::parse(format!("failed to read object {id}: {e}")))?;

        let token = lexer.read_token();
        if token == "stream" {
            lexer.skip_whitespace();

            let dict = value
                .as_dict()
                .ok_or_else(|| PDFImportError::parse("stream without a dictionary"))?;
            let length = stream_length(data, xref, dict)?;

            let bytes = lexer
                .read_bytes(length)
                .ok_or_else(|| {
                    PDFImportError::parse("stream payload extends past end of input")
                })?
                .to_vec();

            let token = lexer.read_token();
            if token != "endstream" {
                return Err(PDFImportError::parse(format!(
                    "expected endstream, got: {token}"
                )));
            }
            let token = lexer.read_token();
            if token != "endobj" {
                return Err(PDFImportError::parse(format!(
                    "expected endobj, got: {token}"
                )));
            }

            return Ok(Value::Object {
                id,
                gen,
                value: Box::new(Value::Stream {
                    dict: Box::new(value),
                    bytes,
                }),
            });
        }

        if token != "endobj" {
            return Err(PDFImportError::parse(format!(
                "expected endobj or stream, got: {token}"
            )));
        }

        Ok(Value::Object {
            id,
            gen,
            value: Box::new(value),
        })
    } else if let Some((container, index)) = xref.compressed_entry(id) {
        resolve_compressed(data, xref, id, container, index)
    } else {
        Err(PDFImportError::Reference(id))
    }
}

// Materialize an object stored inside an /ObjStm container (PDF 1.5).
fn resolve_compressed(
    data: &[u8],
    xref: &XRefTable,
    requested_id: i64,
    container_id: i64,
    index: usize,
) -> PDFImportResult<Value> {
    trace!("materializing object {requested_id} from object stream {container_id}");

    let container = resolve_ref(data, xref, container_id, 0).map_err(|e| {
        PDFImportError::parse(format!("failed to resolve object stream container: {e}"))
    })?;

    let (dict, bytes) = match container.unwrap_object() {
        Value::Stream { dict, bytes } => (
            dict.as_dict()
                .ok_or_else(|| PDFImportError::parse("object stream without a dictionary"))?,
            bytes,
        ),
        _ => {
            return Err(PDFImportError::parse(
                "object stream container is not a stream",
            ))
        }
    };

    if dict.get("/Type").and_then(Value::as_name) != Some("/ObjStm") {
        return Err(PDFImportError::parse(
            "expected compressed object container type to be /ObjStm",
        ));
    }

    let n = dict
        .get("/N")
        .and_then(Value::as_integer)
        .filter(|n| *n > 0)
        .ok_or_else(|| PDFImportError::parse("object stream has no sub-objects"))?;
    let first = dict
        .get("/First")
        .and_then(Value::as_integer)
        .ok_or_else(|| PDFImportError::parse("object stream missing /First"))?
        as usize;

    let decoded = match dict.get("/Filter") {
        None => bytes.clone(),
        Some(Value::Name(name)) if name == "/FlateDecode" => flate_decode(bytes)?,
        Some(Value::Name(name)) => {
            return Err(PDFImportError::unsupported(format!(
                "object stream filter {name}"
            )))
        }
        Some(_) => {
            return Err(PDFImportError::unsupported(
                "object stream filter chains",
            ))
        }
    };

    // The header is /N pairs of (sub-object id, offset from /First).
    let mut lexer = Lexer::new(&decoded);
    let mut selected = None;
    for i in 0..n {
        let id_token = lexer.read_token();
        let sub_id: i64 = id_token.parse().map_err(|_| {
            PDFImportError::parse(format!("invalid object stream header id: {id_token}"))
        })?;
        let offset_token = lexer.read_token();
        let sub_offset: usize = offset_token.parse().map_err(|_| {
            PDFImportError::parse(format!(
                "invalid object stream header offset: {offset_token}"
            ))
        })?;
        if i as usize == index {
            selected = Some((sub_id, sub_offset));
        }
    }

    let (sub_id, sub_offset) = selected.ok_or(PDFImportError::Reference(requested_id))?;

    let mut lexer = Lexer::at(&decoded, first + sub_offset);
    let value = read_value(&mut lexer).map_err(|e| {
        PDFImportError::parse(format!("failed to read compressed object {sub_id}: {e}"))
    })?;

    Ok(Value::Object {
        id: sub_id,
        gen: 0,
        value: Box::new(value),
    })
}

// Cross-reference stream (PDF 1.5+): the lexer sits just past the object
// declaration; the dictionary, the FlateDecode'd and predictor-reversed
// rows, and any /Prev chain follow.
fn read_xref_stream(
    data: &[u8],
    lexer: &mut Lexer,
    xref: &mut XRefTable,
    trailer: &mut Option<Value>,
) -> PDFImportResult<Option<usize>> {
    let dict_value = read_value(lexer)
        .map_err(|e| PDFImportError::parse(format!("failed to read xref stream: {e}")))?;
    let dict = match &dict_value {
        Value::Dictionary(d) => d,
        _ => {
            return Err(PDFImportError::parse(
                "cross-reference stream object is not a dictionary",
            ))
        }
    };

    if dict.get("/Type").and_then(Value::as_name) != Some("/XRef") {
        return Err(PDFImportError::parse(
            "expected /Type /XRef in cross-reference stream",
        ));
    }

    let widths = match dict.get("/W") {
        Some(Value::Array(items)) if items.len() == 3 => {
            let mut widths = [0usize; 3];
            for (slot, item) in widths.iter_mut().zip(items) {
                *slot = item
                    .as_integer()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| PDFImportError::parse("invalid /W entry"))?;
            }
            widths
        }
        _ => {
            return Err(PDFImportError::unsupported(
                "cross-reference stream missing /W",
            ))
        }
    };
    let row_width: usize = widths.iter().sum();
    if row_width == 0 || widths.iter().any(|w| *w > 4) {
        return Err(PDFImportError::unsupported(format!(
            "cross-reference stream field widths {widths:?}"
        )));
    }

    let mut predictor = 1i64;
    let mut columns = 1i64;
    if let Some(parms) = dict.get("/DecodeParms") {
        if let Some(parms) = parms.as_dict() {
            if let Some(c) = parms.get("/Columns").and_then(Value::as_integer) {
                columns = c;
            }
            if let Some(p) = parms.get("/Predictor").and_then(Value::as_integer) {
                predictor = p;
            }
        }
        if columns > 4 || predictor > 12 {
            return Err(PDFImportError::unsupported(
                "/DecodeParms with /Columns > 4 or /Predictor > 12",
            ));
        }
    }

    let index = match dict.get("/Index") {
        Some(Value::Array(items)) => {
            if items.len() < 2 || items.len() % 2 != 0 {
                return Err(PDFImportError::parse("/Index array must hold pairs"));
            }
            let mut ranges = Vec::with_capacity(items.len() / 2);
            for pair in items.chunks(2) {
                let first = pair[0]
                    .as_integer()
                    .ok_or_else(|| PDFImportError::parse("invalid /Index entry"))?;
                let count = pair[1]
                    .as_integer()
                    .ok_or_else(|| PDFImportError::parse("invalid /Index entry"))?;
                ranges.push((first, count));
            }
            ranges
        }
        Some(_) => return Err(PDFImportError::parse("/Index is not an array")),
        None => {
            let size = dict
                .get("/Size")
                .and_then(Value::as_integer)
                .ok_or_else(|| {
                    PDFImportError::unsupported("cross-reference stream missing /Size")
                })?;
            vec![(0, size)]
        }
    };

    let prev = dict
        .get("/Prev")
        .and_then(Value::as_integer)
        .map(|n| n as usize);

    // The newest xref stream carrying /Root becomes the trailer source.
    if dict.get("/Root").is_some() && trailer.is_none() {
        *trailer = Some(dict_value.clone());
    }

    let length = stream_length(data, xref, dict)?;

    let token = lexer.read_token();
    if token != "stream" {
        return Err(PDFImportError::parse(format!(
            "expected stream, got: {token}"
        )));
    }
    lexer.skip_whitespace();
    let raw = lexer
        .read_bytes(length)
        .ok_or_else(|| PDFImportError::parse("xref stream payload extends past end of input"))?
        .to_vec();
    let token = lexer.read_token();
    if token != "endstream" {
        return Err(PDFImportError::parse(format!(
            "expected endstream, got: {token}"
        )));
    }
    let token = lexer.read_token();
    if token != "endobj" {
        return Err(PDFImportError::parse(format!(
            "expected endobj, got: {token}"
        )));
    }

    let decoded = match dict.get("/Filter") {
        None => raw,
        Some(Value::Name(name)) if name == "/FlateDecode" => flate_decode(&raw)?,
        Some(Value::Name(name)) => {
            return Err(PDFImportError::unsupported(format!(
                "xref stream filter {name}"
            )))
        }
        Some(_) => return Err(PDFImportError::unsupported("xref stream filter chains")),
    };

    let rows = if predictor > 1 {
        apply_predictor(&decoded, predictor, row_width, 1, 8)?
    } else {
        decoded
    };

    let mut chunks = rows.chunks_exact(row_width);
    'ranges: for (first, count) in index {
        for j in 0..count {
            let id = first + j;
            let row = match chunks.next() {
                Some(row) => row,
                None => {
                    warn!("xref stream ended before /Index ranges were exhausted");
                    break 'ranges;
                }
            };

            let (type_field, rest) = row.split_at(widths[0]);
            let (middle_field, gen_field) = rest.split_at(widths[1]);

            // A zero-width type field defaults the entry type to 1.
            let entry_type = if widths[0] == 0 {
                1
            } else {
                read_be(type_field)
            };

            match entry_type {
                0 => {}
                1 => xref.insert_classic(id, read_be(gen_field) as i64, read_be(middle_field)),
                2 => xref.insert_compressed(
                    id,
                    read_be(middle_field) as i64,
                    read_be(gen_field) as usize,
                ),
                t => {
                    return Err(PDFImportError::parse(format!(
                        "impossible xref entry type: {t}"
                    )))
                }
            }
        }
    }

    Ok(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use test_log::test;

    fn reader_for(data: Vec<u8>) -> PDFReader {
        PDFReader::from_stream("fixture.pdf", std::io::Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_simple_document() {
        let reader = reader_for(fixtures::simple_pdf());
        assert_eq!(reader.get_num_pages().unwrap(), 1);

        let boxes = reader.get_page_boxes(1, 1.0).unwrap();
        let media = boxes.get("/MediaBox").unwrap();
        assert_eq!(media.w, 612.0);
        assert_eq!(media.h, 792.0);
        assert_eq!(media.urx, 612.0);
        assert!(!boxes.contains_key("/CropBox"));
    }

    #[test]
    fn test_read_is_idempotent() {
        let mut reader = reader_for(fixtures::simple_pdf());
        let pages_before = reader.pages.len();
        let xref_before = reader.xref.len();
        reader.read().unwrap();
        assert_eq!(reader.pages.len(), pages_before);
        assert_eq!(reader.xref.len(), xref_before);
    }

    #[test]
    fn test_content_is_decoded() {
        let reader = reader_for(fixtures::simple_pdf());
        let content = reader.get_content(1).unwrap();
        assert_eq!(content, fixtures::SIMPLE_CONTENT);
    }

    #[test]
    fn test_indirect_length_is_resolved() {
        // simple_pdf stores the content stream /Length in its own object.
        let reader = reader_for(fixtures::simple_pdf());
        let stream = reader
            .resolve_object(&Value::IndirectRef { id: 4, gen: 0 })
            .unwrap();
        match stream.unwrap_object() {
            Value::Stream { bytes, .. } => assert!(!bytes.is_empty()),
            other => panic!("expected stream, got {other:?}"),
        }
    }

    #[test]
    fn test_page_resources_carry_font() {
        let reader = reader_for(fixtures::simple_pdf());
        let resources = reader.get_page_resources(1).unwrap();
        let font = resources.get("/Font").unwrap().get("/F1").unwrap();
        assert_eq!(font, &Value::IndirectRef { id: 5, gen: 0 });
    }

    #[test]
    fn test_dangling_reference() {
        let reader = reader_for(fixtures::simple_pdf());
        let err = reader
            .resolve_object(&Value::IndirectRef { id: 99, gen: 0 })
            .unwrap_err();
        assert!(matches!(err, PDFImportError::Reference(99)));
    }

    #[test]
    fn test_page_out_of_range() {
        let reader = reader_for(fixtures::simple_pdf());
        assert!(matches!(
            reader.get_page_boxes(5, 1.0),
            Err(PDFImportError::Page(_))
        ));
    }

    #[test]
    fn test_nested_page_tree_order() {
        let reader = reader_for(fixtures::nested_tree_pdf());
        assert_eq!(reader.get_num_pages().unwrap(), 3);

        // Leaves carry distinct widths in tree order.
        for (pageno, width) in [(1, 100.0), (2, 200.0), (3, 300.0)] {
            let boxes = reader.get_page_boxes(pageno, 1.0).unwrap();
            assert_eq!(boxes.get("/MediaBox").unwrap().w, width, "page {pageno}");
        }
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let mut builder = fixtures::PdfBuilder::new();
        builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        builder.add_object(2, "<< /Type /Pages /Kids [3 0 R] /Count 2 >>");
        builder.add_object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>",
        );
        let data = builder.finish(1);

        let err = PDFReader::from_stream("bad.pdf", std::io::Cursor::new(data)).unwrap_err();
        assert!(matches!(err, PDFImportError::Page(_)));
    }

    #[test]
    fn test_rotation_inherited_from_root() {
        let reader = reader_for(fixtures::custom_page_pdf("[0 0 612 792]", 90));
        assert_eq!(reader.get_page_rotation(1).unwrap(), 90);
    }

    #[test]
    fn test_rotation_defaults_to_zero() {
        let reader = reader_for(fixtures::simple_pdf());
        assert_eq!(reader.get_page_rotation(1).unwrap(), 0);
    }

    #[test]
    fn test_incremental_update_wins() {
        let reader = reader_for(fixtures::updated_pdf());
        let font = reader
            .resolve_object(&Value::IndirectRef { id: 5, gen: 0 })
            .unwrap();
        assert_eq!(
            font.get("/BaseFont").and_then(Value::as_name),
            Some("/Courier")
        );
    }

    #[test]
    fn test_multiple_content_streams_are_joined() {
        let mut builder = fixtures::PdfBuilder::new();
        builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        builder.add_object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
        builder.add_object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] \
             /Contents [4 0 R 5 0 R] >>",
        );
        builder.add_stream_object(4, "<< /Length 8 >>", b"0 0 m BT");
        builder.add_stream_object(5, "<< /Length 2 >>", b"ET");
        let data = builder.finish(1);

        let reader = reader_for(data);
        assert_eq!(reader.get_content(1).unwrap(), b"0 0 m BT\nET");
    }

    #[test]
    fn test_unsupported_content_filter() {
        let mut builder = fixtures::PdfBuilder::new();
        builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        builder.add_object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
        builder.add_object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] /Contents 4 0 R >>",
        );
        builder.add_stream_object(4, "<< /Length 4 /Filter /LZWDecode >>", b"data");
        let data = builder.finish(1);

        let reader = reader_for(data);
        assert!(matches!(
            reader.get_content(1),
            Err(PDFImportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_xref_stream_document() {
        let reader = reader_for(fixtures::objstm_pdf());
        assert_eq!(reader.get_num_pages().unwrap(), 1);

        // Catalog and page tree live in the object stream.
        let catalog = reader
            .resolve_object(&Value::IndirectRef { id: 1, gen: 0 })
            .unwrap();
        assert_eq!(
            catalog.get("/Type").and_then(Value::as_name),
            Some("/Catalog")
        );

        let boxes = reader.get_page_boxes(1, 1.0).unwrap();
        assert_eq!(boxes.get("/MediaBox").unwrap().w, 612.0);
    }
}
