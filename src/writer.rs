//! Serialization of imported pages as Form XObjects

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

use log::{debug, trace};
use sha1::{Digest, Sha1};

use crate::error::{PDFImportError, PDFImportResult};
use crate::pdf::filter::flate_encode;
use crate::pdf::reader::{PDFReader, Rect};
use crate::pdf::value::Value;

/// Identity of one emitted object: its numeric output id and its stable hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectId {
    pub id: i64,
    pub hash: String,
}

/// One imported page, ready to be emitted as a Form XObject
#[derive(Debug, Clone)]
pub struct Template {
    /// Resolved resource dictionary of the source page
    pub resources: Value,
    /// Decoded content stream bytes
    pub content: Vec<u8>,
    /// The chosen page box
    pub rect: Rect,
    /// Every box present on the page
    pub boxes: BTreeMap<String, Rect>,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Normalized rotation: a non-positive multiple of 90 degrees
    pub rotation: i64,
    /// Output object number assigned when the XObject was emitted
    pub n: i64,
}

#[derive(Debug, Clone, Copy)]
struct PendingObject {
    gen: i64,
    new_id: i64,
}

struct WrittenObject {
    hash: String,
    body: Vec<u8>,
    hash_pos: BTreeMap<usize, String>,
}

struct CurrentObject {
    id: i64,
    hash: String,
    buffer: Vec<u8>,
    hash_pos: BTreeMap<usize, String>,
}

/// Writer for one source document.
///
/// Emits a Form XObject per imported page, then drains the queue of every
/// indirect object those XObjects transitively reference, assigning output
/// ids in the host document's id space.
pub struct PDFWriter {
    k: f64,
    source_file: String,
    tpls: Vec<Template>,
    n: i64,
    // Discovered but not yet emitted, keyed by source id; popped in
    // ascending order so emission is deterministic.
    obj_stack: BTreeMap<i64, PendingObject>,
    // Every source id ever discovered, with its assigned output id. Entries
    // are recorded before the target is emitted, which is what terminates
    // cyclic reference graphs.
    don_obj_stack: HashMap<i64, i64>,
    written: BTreeMap<i64, WrittenObject>,
    current: Option<CurrentObject>,
    tpl_id_offset: i64,
    use_hash: bool,
    compress: bool,
}

impl PDFWriter {
    /// Create a writer for a source document name (used in object hashes)
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            k: 1.0,
            source_file: source_file.into(),
            tpls: Vec::new(),
            n: 0,
            obj_stack: BTreeMap::new(),
            don_obj_stack: HashMap::new(),
            written: BTreeMap::new(),
            current: None,
            tpl_id_offset: 0,
            use_hash: false,
            compress: true,
        }
    }

    /// Base for template numbering, so several writers share one namespace
    pub fn set_tpl_id_offset(&mut self, offset: i64) {
        self.tpl_id_offset = offset;
    }

    /// Emit references as 40-char hashes instead of numeric ids
    pub fn set_use_hash(&mut self, use_hash: bool) {
        self.use_hash = use_hash;
    }

    /// Whether template content is re-compressed on emission (default true)
    pub fn set_compression(&mut self, compress: bool) {
        self.compress = compress;
    }

    /// Seed the id counter; the next allocated output id will be `id`
    pub fn set_next_object_id(&mut self, id: i64) {
        self.n = id - 1;
    }

    /// Imported templates
    pub fn templates(&self) -> &[Template] {
        &self.tpls
    }

    /// Import one page as a template; returns the writer-local template id.
    ///
    /// A box missing from the page falls back along
    /// BleedBox/TrimBox/ArtBox -> CropBox -> MediaBox before failing.
    pub fn import_page(
        &mut self,
        reader: &PDFReader,
        pageno: usize,
        box_name: &str,
    ) -> PDFImportResult<i64> {
        debug!("importing page {pageno} of {} ({box_name})", self.source_file);
        self.k = 1.0;

        let page_boxes = reader.get_page_boxes(pageno, self.k)?;

        let mut chosen = box_name;
        while !page_boxes.contains_key(chosen) {
            chosen = match chosen {
                "/BleedBox" | "/TrimBox" | "/ArtBox" => "/CropBox",
                "/CropBox" => "/MediaBox",
                _ => break,
            };
        }
        let rect = *page_boxes.get(chosen).ok_or_else(|| {
            PDFImportError::page(format!("box {box_name} not found on page {pageno}"))
        })?;

        let resources = reader.get_page_resources(pageno)?;
        let content = reader.get_content(pageno)?;
        let rotation = reader.get_page_rotation(pageno)?;

        let mut tpl = Template {
            resources,
            content,
            rect,
            boxes: page_boxes,
            x: 0.0,
            y: 0.0,
            w: rect.w,
            h: rect.h,
            rotation: 0,
            n: 0,
        };

        let angle = rotation % 360;
        if angle != 0 {
            // Odd multiples of 90 swap the template's width and height.
            let steps = angle / 90;
            if steps % 2 != 0 {
                std::mem::swap(&mut tpl.w, &mut tpl.h);
            }
            let normalized = if angle < 0 { angle + 360 } else { angle };
            tpl.rotation = -normalized;
        }

        self.tpls.push(tpl);
        Ok(self.tpls.len() as i64 - 1)
    }

    fn sha_of_int(&self, id: i64) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("{}-{}-{}", self.tpl_id_offset, id, self.source_file).as_bytes());
        hex::encode(hasher.finalize())
    }

    fn begin_obj(&mut self, id: i64) {
        self.current = Some(CurrentObject {
            id,
            hash: self.sha_of_int(id),
            buffer: Vec::new(),
            hash_pos: BTreeMap::new(),
        });
    }

    fn end_obj(&mut self) -> PDFImportResult<()> {
        self.out(b"endobj")?;
        let current = self
            .current
            .take()
            .ok_or_else(|| PDFImportError::serialization("no object is open"))?;
        self.written.insert(
            current.id,
            WrittenObject {
                hash: current.hash,
                body: current.buffer,
                hash_pos: current.hash_pos,
            },
        );
        Ok(())
    }

    fn current_mut(&mut self) -> PDFImportResult<&mut CurrentObject> {
        self.current
            .as_mut()
            .ok_or_else(|| PDFImportError::serialization("no object is open"))
    }

    fn straight_out(&mut self, bytes: &[u8]) -> PDFImportResult<()> {
        self.current_mut()?.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn out(&mut self, bytes: &[u8]) -> PDFImportResult<()> {
        let buffer = &mut self.current_mut()?.buffer;
        buffer.extend_from_slice(bytes);
        buffer.push(b'\n');
        Ok(())
    }

    // Emit a reference to an output object, recording the buffer position so
    // the host can rewrite hashes into its own numbering.
    fn out_obj_ref(&mut self, obj_id: i64) -> PDFImportResult<()> {
        let sha = self.sha_of_int(obj_id);
        let use_hash = self.use_hash;
        let current = self.current_mut()?;
        current.hash_pos.insert(current.buffer.len(), sha.clone());
        if use_hash {
            current.buffer.extend_from_slice(sha.as_bytes());
        } else {
            current.buffer.extend_from_slice(obj_id.to_string().as_bytes());
        }
        current.buffer.extend_from_slice(b" 0 R ");
        Ok(())
    }

    /// Serialize one value into the open object. Indirect references are
    /// assigned output ids on first sight and queued for the drain.
    fn write_value(&mut self, value: &Value) -> PDFImportResult<()> {
        match value {
            Value::Token(t) | Value::Name(t) => {
                self.straight_out(t.as_bytes())?;
                self.straight_out(b" ")?;
            }
            Value::Integer(n) => self.straight_out(format!("{n} ").as_bytes())?,
            Value::Real(r) => self.straight_out(format!("{r:.6} ").as_bytes())?,
            Value::Array(items) => {
                self.straight_out(b"[")?;
                for item in items {
                    self.write_value(item)?;
                }
                self.out(b"]")?;
            }
            Value::Dictionary(dict) => {
                self.straight_out(b"<<")?;
                for (key, item) in dict {
                    self.straight_out(format!("{key} ").as_bytes())?;
                    self.write_value(item)?;
                }
                self.straight_out(b">>")?;
            }
            Value::IndirectRef { id, gen } => {
                let new_id = match self.don_obj_stack.get(id) {
                    Some(assigned) => *assigned,
                    None => {
                        self.n += 1;
                        self.obj_stack.insert(
                            *id,
                            PendingObject {
                                gen: *gen,
                                new_id: self.n,
                            },
                        );
                        self.don_obj_stack.insert(*id, self.n);
                        self.n
                    }
                };
                self.out_obj_ref(new_id)?;
            }
            Value::StringLit(s) => {
                self.straight_out(b"(")?;
                self.straight_out(s)?;
                self.straight_out(b")")?;
            }
            Value::Stream { dict, bytes } => {
                self.write_value(dict)?;
                self.straight_out(b"\n")?;
                self.out(b"stream")?;
                self.out(bytes)?;
                self.out(b"endstream")?;
            }
            Value::HexString(h) => {
                self.straight_out(b"<")?;
                self.straight_out(h)?;
                self.straight_out(b">")?;
            }
            Value::Boolean(true) => self.straight_out(b"true ")?,
            Value::Boolean(false) => self.straight_out(b"false ")?,
            Value::Null => self.straight_out(b"null ")?,
            Value::Object { value, .. } => self.write_value(value)?,
            Value::ObjectDecl { .. } => {
                return Err(PDFImportError::serialization(
                    "object declaration cannot be serialized",
                ))
            }
        }
        Ok(())
    }

    /// Emit one Form XObject per imported template, then every object they
    /// transitively reference. Returns template names mapped to the identity
    /// of their wrapper object.
    pub fn put_form_xobjects(
        &mut self,
        reader: &PDFReader,
    ) -> PDFImportResult<BTreeMap<String, ObjectId>> {
        debug!(
            "emitting {} form xobjects from {}",
            self.tpls.len(),
            self.source_file
        );

        let mut result = BTreeMap::new();
        let filter_prefix = if self.compress {
            "/Filter /FlateDecode "
        } else {
            ""
        };

        for i in 0..self.tpls.len() {
            let tpl = self.tpls[i].clone();
            let payload = if self.compress {
                flate_encode(&tpl.content)?
            } else {
                tpl.content.clone()
            };

            self.n += 1;
            let wrapper_id = self.n;
            self.tpls[i].n = wrapper_id;
            self.begin_obj(wrapper_id);

            result.insert(
                format!("/GOFPDITPL{}", i as i64 + self.tpl_id_offset),
                ObjectId {
                    id: wrapper_id,
                    hash: self.sha_of_int(wrapper_id),
                },
            );

            self.out(format!("<<{filter_prefix}/Type /XObject").as_bytes())?;
            self.out(b"/Subtype /Form")?;
            self.out(b"/FormType 1")?;

            let bx = tpl.rect;
            self.out(
                format!(
                    "/BBox [{:.2} {:.2} {:.2} {:.2}]",
                    bx.llx * self.k,
                    bx.lly * self.k,
                    (bx.urx + tpl.x) * self.k,
                    (bx.ury - tpl.y) * self.k
                )
                .as_bytes(),
            )?;

            let mut c = 1.0f64;
            let mut s = 0.0f64;
            let mut tx = -bx.llx;
            let mut ty = -bx.lly;
            if tpl.rotation != 0 {
                let angle = tpl.rotation as f64 * PI / 180.0;
                c = angle.cos();
                s = angle.sin();
                match tpl.rotation {
                    -90 => {
                        tx = -bx.lly;
                        ty = bx.urx;
                    }
                    -180 => {
                        tx = bx.urx;
                        ty = bx.ury;
                    }
                    -270 => {
                        tx = bx.ury;
                        ty = -bx.llx;
                    }
                    _ => {}
                }
            }
            tx *= self.k;
            ty *= self.k;

            if c != 1.0 || s != 0.0 || tx != 0.0 || ty != 0.0 {
                self.out(
                    format!(
                        "/Matrix [{c:.5} {s:.5} {:.5} {c:.5} {tx:.5} {ty:.5}]",
                        -s
                    )
                    .as_bytes(),
                )?;
            }

            self.out(b"/Resources ")?;
            self.write_value(&tpl.resources)?;

            self.out(format!("/Length {} >>", payload.len()).as_bytes())?;
            self.out(b"stream")?;
            self.out(&payload)?;
            self.out(b"endstream")?;
            self.end_obj()?;

            // Drain dependencies revealed by this wrapper's resources before
            // the next template.
            self.put_imported_objects(reader)?;
        }

        Ok(result)
    }

    // Emit queued source objects until no new references appear. Serializing
    // an object may enqueue further references; the ascending pop order
    // keeps output stable.
    fn put_imported_objects(&mut self, reader: &PDFReader) -> PDFImportResult<()> {
        while let Some((source_id, pending)) = self.obj_stack.pop_first() {
            trace!(
                "importing source object {source_id} as output object {}",
                pending.new_id
            );
            let spec = Value::IndirectRef {
                id: source_id,
                gen: pending.gen,
            };
            let resolved = reader.resolve_object(&spec).map_err(|e| match e {
                PDFImportError::Parse(msg) => PDFImportError::Parse(format!(
                    "failed to resolve imported object {source_id}: {msg}"
                )),
                other => other,
            })?;

            self.begin_obj(pending.new_id);
            self.write_value(resolved.unwrap_object())?;
            self.end_obj()?;
        }
        Ok(())
    }

    /// Emitted bodies keyed by output object id
    pub fn get_imported_objects(&self) -> BTreeMap<i64, Vec<u8>> {
        self.written
            .iter()
            .map(|(id, obj)| (*id, obj.body.clone()))
            .collect()
    }

    /// Emitted bodies keyed by object hash
    pub fn get_imported_objects_unordered(&self) -> HashMap<String, Vec<u8>> {
        self.written
            .values()
            .map(|obj| (obj.hash.clone(), obj.body.clone()))
            .collect()
    }

    /// For each object hash, the byte positions inside its body where a
    /// referenced object's hash was written
    pub fn get_imported_obj_hash_pos(&self) -> HashMap<String, BTreeMap<usize, String>> {
        self.written
            .values()
            .map(|obj| (obj.hash.clone(), obj.hash_pos.clone()))
            .collect()
    }

    /// Drop accumulated bodies (id assignments are retained)
    pub fn clear_imported_objects(&mut self) {
        self.written.clear();
    }

    /// Fill a zero dimension preserving the template's aspect ratio
    pub fn get_template_size(&self, tpl_id: i64, w: f64, h: f64) -> PDFImportResult<(f64, f64)> {
        let tpl = self
            .tpls
            .get(usize::try_from(tpl_id).unwrap_or(usize::MAX))
            .ok_or_else(|| PDFImportError::page(format!("template {tpl_id} does not exist")))?;

        let mut w = w;
        let mut h = h;
        if w == 0.0 && h == 0.0 {
            w = tpl.w;
            h = tpl.h;
        }
        if w == 0.0 {
            w = h * tpl.w / tpl.h;
        }
        if h == 0.0 {
            h = w * tpl.h / tpl.w;
        }
        Ok((w, h))
    }

    /// Placement math for drawing a template on a host page: returns the
    /// XObject name, the scale factors, and the scaled translation
    pub fn use_template(
        &self,
        tpl_id: i64,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> PDFImportResult<(String, f64, f64, f64, f64)> {
        let tpl = self
            .tpls
            .get(usize::try_from(tpl_id).unwrap_or(usize::MAX))
            .ok_or_else(|| PDFImportError::page(format!("template {tpl_id} does not exist")))?;

        let x = x + tpl.x;
        let y = y + tpl.y;
        let (w, h) = self.get_template_size(tpl_id, w, h)?;

        let scale_x = w / tpl.w;
        let scale_y = h / tpl.h;
        let tx = x;
        let ty = -y - h;

        Ok((
            format!("/GOFPDITPL{}", tpl_id + self.tpl_id_offset),
            scale_x,
            scale_y,
            tx * self.k,
            ty * self.k,
        ))
    }
}
