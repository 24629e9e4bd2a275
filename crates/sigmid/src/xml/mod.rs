//! Streaming XSD-driven XML validation.
//!
//! [Schema::parse] turns an XSD document into an immutable schema tree; [validate] walks an XML
//! document against it, enforcing ordering, occurrence, and facet rules, and emits leaf values
//! as callbacks in document order.  Values borrow the input buffer for the duration of the
//! callback; a caller that wants to keep one copies it.
//!
//! The file-level helpers load both documents through [MBuf::read_file] and run the same pipeline.

mod schema;
mod stype;
mod tags;
mod validate;
mod xsd;

use std::path::Path;
use std::sync::Arc;

use premem::PreMem;

use crate::config::MAX_FILE_PATH;
use crate::error::{Error, Result};
use crate::logging::LM_XMLP;
use crate::mbuf::MBuf;
use crate::pl::Pl;

pub use schema::{
    AnyNamespace, ComplexType, CtId, Disposition, ElemBody, ElemId, Facet, ProcessContents,
    Schema, SimpleType, StId, XmlDataType, XsdElement,
};
pub use validate::validate;

/// A leaf value as delivered to callbacks.  Strings borrow the input buffer (or the schema, for
/// synthesized defaults).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum XmlValue<'a> {
    /// Non-leaf events carry no value.
    None,
    Bool(bool),
    U64(u64),
    Str(Pl<'a>),
}

/// One validation event: an element and its coerced value.
#[derive(Debug)]
pub struct XmlEvent<'a> {
    pub name: &'a str,
    pub value: XmlValue<'a>,
    /// The concrete value type after coercion; simple-typed elements report their base type.
    pub data_type: XmlDataType,
}

/// An owned value, for the store-into-table mode.
#[derive(Clone, Debug, PartialEq)]
pub enum OwnedXmlValue {
    Bool(bool),
    U64(u64),
    Str(String),
}

impl OwnedXmlValue {
    fn from_value(v: &XmlValue<'_>) -> Option<OwnedXmlValue> {
        match v {
            XmlValue::None => None,
            XmlValue::Bool(b) => Some(OwnedXmlValue::Bool(*b)),
            XmlValue::U64(n) => Some(OwnedXmlValue::U64(*n)),
            XmlValue::Str(pl) => Some(OwnedXmlValue::Str(
                String::from_utf8_lossy(pl.as_bytes()).into_owned(),
            )),
        }
    }
}

/// One row of the expected-element table: name, the data type the application expects
/// ([XmlDataType::Simple] for simple-typed elements), and the slot filled in storage mode.
#[derive(Clone, Debug)]
pub struct ExpectedData {
    pub name: String,
    pub data_type: XmlDataType,
    pub value: Option<OwnedXmlValue>,
}

impl ExpectedData {
    pub fn new(name: impl Into<String>, data_type: XmlDataType) -> ExpectedData {
        ExpectedData {
            name: name.into(),
            data_type,
            value: None,
        }
    }
}

pub type XmlCallback<'cb> = Box<dyn FnMut(&XmlEvent<'_>) + 'cb>;

/// What the application wants out of a validation run.
///
/// With an empty `expected` table every leaf is delivered to the callback.  With a non-empty
/// table only listed names are delivered, their declared types are checked, and — when no
/// callback is installed — values are stored back into the table rows instead.
pub struct CallbackInfo<'cb> {
    /// Deliver only simple-typed leaves (and xs:any leaves); complex closes stay internal.
    pub is_leaf_only: bool,

    /// Synthesize default/fixed values for optional elements absent from the document.
    pub is_use_default: bool,

    pub expected: Vec<ExpectedData>,
    pub callback: Option<XmlCallback<'cb>>,
}

impl<'cb> CallbackInfo<'cb> {
    pub fn new() -> CallbackInfo<'cb> {
        CallbackInfo {
            is_leaf_only: true,
            is_use_default: false,
            expected: Vec::new(),
            callback: None,
        }
    }

    /// Leaf-only delivery of every element to `f`.
    pub fn with_callback(f: impl FnMut(&XmlEvent<'_>) + 'cb) -> CallbackInfo<'cb> {
        CallbackInfo {
            callback: Some(Box::new(f)),
            ..CallbackInfo::new()
        }
    }
}

impl Default for CallbackInfo<'_> {
    fn default() -> Self {
        CallbackInfo::new()
    }
}

/// Parse-only check of an XSD document.
pub fn is_xsd_valid(xsd: &mut MBuf) -> bool {
    match Schema::parse(xsd) {
        Ok(_) => true,
        Err(e) => {
            log::error!(target: LM_XMLP, "xsd rejected: {e}");
            false
        }
    }
}

/// Validate `xml` against `xsd`, delivering events to `cb`.
pub fn is_xml_valid(xml: &mut MBuf, xsd: &mut MBuf, cb: &mut CallbackInfo<'_>) -> bool {
    let schema = match Schema::parse(xsd) {
        Ok(s) => s,
        Err(e) => {
            log::error!(target: LM_XMLP, "xsd rejected: {e}");
            return false;
        }
    };
    match validate(xml, &schema, cb) {
        Ok(()) => true,
        Err(e) => {
            log::error!(target: LM_XMLP, "xml rejected: {e}");
            false
        }
    }
}

/// Load `<folder>/<xsd_file>` and `<folder>/<xml_file>` and run a validation, delivering leaf
/// values through `cb`.
pub fn get_leaf_values(
    pool: &Arc<PreMem>,
    folder: &Path,
    xsd_file: &str,
    xml_file: &str,
    cb: &mut CallbackInfo<'_>,
) -> Result<()> {
    let xsd_path = folder.join(xsd_file);
    let xml_path = folder.join(xml_file);
    for p in [&xsd_path, &xml_path] {
        if p.as_os_str().len() > MAX_FILE_PATH {
            return Err(Error::invalid(format!(
                "path '{}' exceeds {MAX_FILE_PATH} bytes",
                p.display()
            )));
        }
    }

    let mut xsd = MBuf::read_file(pool, &xsd_path, 4096)?;
    let mut xml = MBuf::read_file(pool, &xml_path, 4096)?;
    let schema = Schema::parse(&mut xsd)?;
    validate(&mut xml, &schema, cb)
}
