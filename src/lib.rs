//! PDF page import library for Rust
//!
//! Imports pages from existing PDF documents and re-emits them as reusable
//! Form XObjects for embedding by an external PDF generator. The generator
//! keeps control of its own file layout (objects, xref, trailer, pages) and
//! receives from this crate the wrapped XObjects, every indirect object they
//! transitively depend on renumbered into the host id space, and the
//! placement math for drawing a template on a host page.
//!
//! Supported sources cover the common modern subset: classic xref tables
//! with `/Prev` chains, cross-reference streams (PDF 1.5+, FlateDecode with
//! PNG predictors), compressed object streams, inherited page attributes,
//! and FlateDecode'd content. Encrypted documents and other filters are out
//! of scope.
//!
//! # Example
//!
//! ```no_run
//! use pdfimport::Importer;
//!
//! # fn main() -> pdfimport::PDFImportResult<()> {
//! let mut importer = Importer::new();
//! importer.set_source_file("letterhead.pdf")?;
//!
//! let tpl = importer.import_page(1, "/MediaBox")?;
//! importer.set_next_object_id(1000)?;
//!
//! // Hand the emitted objects to the host generator ...
//! let names = importer.put_form_xobjects()?;
//! let objects = importer.get_imported_objects()?;
//!
//! // ... and place the template on one of its pages.
//! let (name, scale_x, scale_y, tx, ty) = importer.use_template(tpl, 10.0, 10.0, 150.0, 0.0)?;
//! # let _ = (names, objects, name, scale_x, scale_y, tx, ty);
//! # Ok(())
//! # }
//! ```

mod error;
mod importer;
mod pdf;
mod writer;

#[cfg(test)]
mod fixtures;

pub use error::{PDFImportError, PDFImportResult};
pub use importer::Importer;
pub use pdf::reader::{PDFReader, Rect, AVAILABLE_BOXES};
pub use pdf::value::{Dictionary, Value};
pub use writer::{ObjectId, PDFWriter, Template};
