//! In-memory PDF fixtures for tests.
//!
//! Fixtures are synthesized at test time so the repository carries no binary
//! sample files; the builder tracks byte offsets while objects are appended
//! and emits a matching xref table (classic or stream form) at the end.

use crate::pdf::filter::flate_encode;

/// Drawing instructions used by [`simple_pdf`]
pub const SIMPLE_CONTENT: &[u8] = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET";

pub struct PdfBuilder {
    buf: Vec<u8>,
    offsets: Vec<(i64, usize)>,
    compressed: Vec<(i64, i64, usize)>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            buf: b"%PDF-1.4\n".to_vec(),
            offsets: Vec::new(),
            compressed: Vec::new(),
        }
    }

    pub fn add_object(&mut self, id: i64, body: &str) {
        self.offsets.push((id, self.buf.len()));
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes());
    }

    pub fn add_stream_object(&mut self, id: i64, dict: &str, data: &[u8]) {
        self.offsets.push((id, self.buf.len()));
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n{dict}\nstream\n").as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
    }

    /// Record that `id` lives in object stream `container` at `index`
    /// (only meaningful with [`finish_xref_stream`](Self::finish_xref_stream))
    pub fn add_compressed_entry(&mut self, id: i64, container: i64, index: usize) {
        self.compressed.push((id, container, index));
    }

    /// Close the file with a classic xref table and trailer.
    ///
    /// Object ids must be contiguous from 1 for the single-subsection table
    /// written here.
    pub fn finish(mut self, root_id: i64) -> Vec<u8> {
        self.offsets.sort();
        let count = self.offsets.len() as i64;
        let xref_pos = self.buf.len();

        let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", count + 1);
        for (_, offset) in &self.offsets {
            tail += &format!("{offset:010} 00000 n \n");
        }
        tail += &format!(
            "trailer\n<< /Size {} /Root {root_id} 0 R >>\nstartxref\n{xref_pos}\n%%EOF",
            count + 1
        );

        self.buf.extend_from_slice(tail.as_bytes());
        self.buf
    }

    /// Close the file with a cross-reference stream (PDF 1.5 form),
    /// `/W [1 2 1]`, FlateDecode, and PNG predictor 12 over 4 columns.
    pub fn finish_xref_stream(mut self, root_id: i64) -> Vec<u8> {
        let max_id = self
            .offsets
            .iter()
            .map(|(id, _)| *id)
            .chain(self.compressed.iter().map(|(id, _, _)| *id))
            .max()
            .unwrap_or(0);
        let xref_id = max_id + 1;
        let size = xref_id + 1;
        let xref_offset = self.buf.len();

        let mut raw = Vec::new();
        for id in 0..size {
            let row: [u8; 4] = if id == xref_id {
                [1, (xref_offset >> 8) as u8, xref_offset as u8, 0]
            } else if let Some((_, offset)) = self.offsets.iter().find(|(i, _)| *i == id) {
                [1, (offset >> 8) as u8, *offset as u8, 0]
            } else if let Some((_, container, index)) =
                self.compressed.iter().find(|(i, _, _)| *i == id)
            {
                [2, (container >> 8) as u8, *container as u8, *index as u8]
            } else {
                [0, 0, 0, 0]
            };
            // PNG "None" filter byte; the reader still has to strip it.
            raw.push(0);
            raw.extend_from_slice(&row);
        }

        let payload = flate_encode(&raw).unwrap();
        let dict = format!(
            "<< /Type /XRef /Size {size} /W [1 2 1] /Root {root_id} 0 R \
             /Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 4 >> \
             /Length {} >>",
            payload.len()
        );

        self.buf
            .extend_from_slice(format!("{xref_id} 0 obj\n{dict}\nstream\n").as_bytes());
        self.buf.extend_from_slice(&payload);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        self.buf
            .extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF").as_bytes());
        self.buf
    }
}

/// One 612x792 page with a font resource, FlateDecode'd content, and an
/// indirect content /Length
pub fn simple_pdf() -> Vec<u8> {
    let compressed = flate_encode(SIMPLE_CONTENT).unwrap();

    let mut builder = PdfBuilder::new();
    builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.add_object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    builder.add_object(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>",
    );
    builder.add_stream_object(4, "<< /Length 6 0 R /Filter /FlateDecode >>", &compressed);
    builder.add_object(5, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    builder.add_object(6, &compressed.len().to_string());
    builder.finish(1)
}

/// One page with the given `/MediaBox` and, when nonzero, `/Rotate` on the
/// root `/Pages` node (so leaves inherit it); raw content
pub fn custom_page_pdf(mediabox: &str, rotate: i64) -> Vec<u8> {
    let rotate_entry = if rotate != 0 {
        format!(" /Rotate {rotate}")
    } else {
        String::new()
    };

    let mut builder = PdfBuilder::new();
    builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.add_object(
        2,
        &format!("<< /Type /Pages /Kids [3 0 R] /Count 1{rotate_entry} >>"),
    );
    builder.add_object(
        3,
        &format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox {mediabox} \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
        ),
    );
    builder.add_stream_object(4, "<< /Length 3 >>", b"q Q");
    builder.add_object(5, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    builder.finish(1)
}

/// A page tree `Pages{Count=3, Kids=[Page, Pages{Count=2, Kids=[Page,
/// Page]}]}`; leaves carry widths 100/200/300 in tree order
pub fn nested_tree_pdf() -> Vec<u8> {
    let mut builder = PdfBuilder::new();
    builder.add_object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.add_object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 >>");
    builder.add_object(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>",
    );
    builder.add_object(
        4,
        "<< /Type /Pages /Parent 2 0 R /Kids [5 0 R 6 0 R] /Count 2 >>",
    );
    builder.add_object(
        5,
        "<< /Type /Page /Parent 4 0 R /MediaBox [0 0 200 200] >>",
    );
    builder.add_object(
        6,
        "<< /Type /Page /Parent 4 0 R /MediaBox [0 0 300 300] >>",
    );
    builder.finish(1)
}

/// PDF 1.5 form: catalog and page tree live in an object stream, located
/// through a cross-reference stream with predictor rows
pub fn objstm_pdf() -> Vec<u8> {
    let sub0 = "<< /Type /Catalog /Pages 2 0 R >>";
    let sub1 = "<< /Type /Pages /Kids [3 0 R] /Count 1 >>";
    let off1 = sub0.len() + 1;
    let header = format!("1 0 2 {off1} ");
    let first = header.len();
    let body = format!("{header}{sub0} {sub1}");
    let packed = flate_encode(body.as_bytes()).unwrap();

    let mut builder = PdfBuilder::new();
    builder.add_object(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>",
    );
    builder.add_stream_object(4, "<< /Length 3 >>", b"q Q");
    builder.add_object(5, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    builder.add_stream_object(
        7,
        &format!(
            "<< /Type /ObjStm /N 2 /First {first} /Filter /FlateDecode /Length {} >>",
            packed.len()
        ),
        &packed,
    );
    builder.add_compressed_entry(1, 7, 0);
    builder.add_compressed_entry(2, 7, 1);
    builder.finish_xref_stream(1)
}

/// [`simple_pdf`] plus an incremental update that replaces the font object
/// through a `/Prev`-chained xref section
pub fn updated_pdf() -> Vec<u8> {
    let mut buf = simple_pdf();

    let marker = b"startxref";
    let hit = buf
        .windows(marker.len())
        .rposition(|w| w == marker)
        .unwrap();
    let old_xref: usize = std::str::from_utf8(&buf[hit + marker.len()..])
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap()
        .parse()
        .unwrap();

    buf.push(b'\n');
    let obj_offset = buf.len();
    buf.extend_from_slice(
        b"5 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>\nendobj\n",
    );
    let new_xref = buf.len();
    buf.extend_from_slice(
        format!(
            "xref\n0 1\n0000000000 65535 f \n5 1\n{obj_offset:010} 00000 n \n\
             trailer\n<< /Size 7 /Root 1 0 R /Prev {old_xref} >>\n\
             startxref\n{new_xref}\n%%EOF"
        )
        .as_bytes(),
    );
    buf
}
