//! Importer façade tying readers and writers together per source document

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};

use log::debug;

use crate::error::{PDFImportError, PDFImportResult};
use crate::pdf::reader::{PDFReader, Rect};
use crate::writer::PDFWriter;

struct TplInfo {
    source_file: String,
    template_id: i64,
}

/// The importer to be used by a PDF generation library.
///
/// Holds one `(PDFReader, PDFWriter)` pair per source document and a shared
/// template counter, so templates imported from several sources carry
/// non-colliding names. Re-importing the same `(source, page)` returns the
/// previously assigned template id.
pub struct Importer {
    source_file: String,
    readers: HashMap<String, PDFReader>,
    writers: HashMap<String, PDFWriter>,
    tpl_map: HashMap<i64, TplInfo>,
    tpl_n: i64,
    imported_pages: HashMap<String, i64>,
    stream_count: u64,
}

impl Default for Importer {
    fn default() -> Self {
        Self::new()
    }
}

impl Importer {
    /// Create a new importer with no sources
    pub fn new() -> Self {
        Self {
            source_file: String::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
            tpl_map: HashMap::new(),
            tpl_n: 0,
            imported_pages: HashMap::new(),
            stream_count: 0,
        }
    }

    /// Select a source PDF by path, creating its reader/writer pair on first
    /// use
    pub fn set_source_file(&mut self, path: &str) -> PDFImportResult<()> {
        self.source_file = path.to_string();

        if !self.readers.contains_key(path) {
            let reader = PDFReader::from_file(path)?;
            self.readers.insert(path.to_string(), reader);
        }
        if !self.writers.contains_key(path) {
            let mut writer = PDFWriter::new(path);
            writer.set_tpl_id_offset(self.tpl_n);
            self.writers.insert(path.to_string(), writer);
        }
        Ok(())
    }

    /// Select a source PDF read from a seekable stream.
    ///
    /// Each call registers the stream under a fresh synthetic `stream-<n>`
    /// key; re-importing pages of the same stream therefore requires going
    /// through the same `Importer` without re-setting the source.
    pub fn set_source_stream<R: Read + Seek>(&mut self, rs: R) -> PDFImportResult<()> {
        self.stream_count += 1;
        let key = format!("stream-{}", self.stream_count);

        let reader = PDFReader::from_stream(&key, rs)?;
        self.readers.insert(key.clone(), reader);

        let mut writer = PDFWriter::new(&key);
        writer.set_tpl_id_offset(self.tpl_n);
        self.writers.insert(key.clone(), writer);

        self.source_file = key;
        Ok(())
    }

    /// Reader for the active source, if one is selected
    pub fn reader(&self) -> Option<&PDFReader> {
        self.readers.get(&self.source_file)
    }

    /// Writer for the active source, if one is selected
    pub fn writer(&self) -> Option<&PDFWriter> {
        self.writers.get(&self.source_file)
    }

    fn current_reader(&self) -> PDFImportResult<&PDFReader> {
        self.readers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))
    }

    fn current_writer_mut(&mut self) -> PDFImportResult<&mut PDFWriter> {
        self.writers
            .get_mut(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))
    }

    /// Number of pages in the active source
    pub fn get_num_pages(&self) -> PDFImportResult<i64> {
        self.current_reader()?.get_num_pages()
    }

    /// Every page's boxes for the active source, keyed by 1-based page
    /// number
    pub fn get_page_sizes(&self) -> PDFImportResult<BTreeMap<usize, BTreeMap<String, Rect>>> {
        self.current_reader()?.get_all_page_boxes(1.0)
    }

    /// Import a page of the active source as a template; idempotent on
    /// `(source, page)`
    pub fn import_page(&mut self, pageno: usize, box_name: &str) -> PDFImportResult<i64> {
        let cache_key = format!("{}-{:04}", self.source_file, pageno);
        if let Some(&tpl_n) = self.imported_pages.get(&cache_key) {
            debug!("page {pageno} already imported as template {tpl_n}");
            return Ok(tpl_n);
        }

        let reader = self
            .readers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;
        let writer = self
            .writers
            .get_mut(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;

        let local_id = writer.import_page(reader, pageno, box_name)?;

        let tpl_n = self.tpl_n;
        self.tpl_map.insert(
            tpl_n,
            TplInfo {
                source_file: self.source_file.clone(),
                template_id: local_id,
            },
        );
        self.tpl_n += 1;
        self.imported_pages.insert(cache_key, tpl_n);

        Ok(tpl_n)
    }

    /// Seed the active writer's id counter so imported ids do not collide
    /// with host-owned ids
    pub fn set_next_object_id(&mut self, id: i64) -> PDFImportResult<()> {
        self.current_writer_mut()?.set_next_object_id(id);
        Ok(())
    }

    /// Emit the active source's Form XObjects; returns template names mapped
    /// to numeric output object ids
    pub fn put_form_xobjects(&mut self) -> PDFImportResult<BTreeMap<String, i64>> {
        let reader = self
            .readers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;
        let writer = self
            .writers
            .get_mut(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;

        let named = writer.put_form_xobjects(reader)?;
        Ok(named.into_iter().map(|(name, id)| (name, id.id)).collect())
    }

    /// Emit the active source's Form XObjects in hash mode; returns template
    /// names mapped to object hashes, letting the host assign numeric ids
    /// after assembly
    pub fn put_form_xobjects_unordered(&mut self) -> PDFImportResult<BTreeMap<String, String>> {
        let reader = self
            .readers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;
        let writer = self
            .writers
            .get_mut(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?;

        writer.set_use_hash(true);
        let named = writer.put_form_xobjects(reader)?;
        Ok(named
            .into_iter()
            .map(|(name, id)| (name, id.hash))
            .collect())
    }

    /// Emitted bodies of the active source keyed by output object id
    pub fn get_imported_objects(&self) -> PDFImportResult<BTreeMap<i64, Vec<u8>>> {
        Ok(self
            .writers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?
            .get_imported_objects())
    }

    /// Emitted bodies of the active source keyed by object hash
    pub fn get_imported_objects_unordered(
        &self,
    ) -> PDFImportResult<HashMap<String, Vec<u8>>> {
        Ok(self
            .writers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?
            .get_imported_objects_unordered())
    }

    /// Hash positions inside each emitted body, for id substitution by the
    /// host
    pub fn get_imported_obj_hash_pos(
        &self,
    ) -> PDFImportResult<HashMap<String, BTreeMap<usize, String>>> {
        Ok(self
            .writers
            .get(&self.source_file)
            .ok_or_else(|| PDFImportError::serialization("no source document selected"))?
            .get_imported_obj_hash_pos())
    }

    /// Drop the active writer's accumulated bodies
    pub fn clear_imported_objects(&mut self) -> PDFImportResult<()> {
        self.current_writer_mut()?.clear_imported_objects();
        Ok(())
    }

    /// Placement math for a previously imported template: the XObject name
    /// and `(scaleX, scaleY, tx, ty)` for a `q cm /Name Do Q` sequence
    pub fn use_template(
        &self,
        tpl_id: i64,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> PDFImportResult<(String, f64, f64, f64, f64)> {
        let info = self
            .tpl_map
            .get(&tpl_id)
            .ok_or_else(|| PDFImportError::page(format!("template {tpl_id} does not exist")))?;
        let writer = self
            .writers
            .get(&info.source_file)
            .ok_or_else(|| PDFImportError::serialization("writer missing for template"))?;
        writer.use_template(info.template_id, x, y, w, h)
    }
}
