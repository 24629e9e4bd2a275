//! The parsed schema tree.
//!
//! Elements, complex types, and simple types live in per-kind arenas indexed by typed ids, so
//! named types can be shared by many elements without reference cycles.  Linking is a separate
//! pass over the arenas: every element holding an unresolved type name gets pointed at the owning
//! type object, and the element tree is checked for instance-axis cycles.  Running the link pass
//! again is a no-op.

use crate::error::{Error, Result};
use crate::list::ListPlus;
use crate::logging::LM_XMLP;

/// The value space of an element, as the validator sees it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum XmlDataType {
    Invalid,
    Boolean,
    UnsignedByte,
    Short,
    Integer,
    Long,
    /// xs:string, and the stringly builtins folded into it (anyURI, dateTime, base64Binary).
    String,
    /// A named type reference not yet linked.
    NoXs,
    Simple,
    Complex,
    /// An element admitted through xs:any.
    Any,
}

impl XmlDataType {
    /// One of the XS builtin value types.
    pub fn is_xs_builtin(self) -> bool {
        matches!(
            self,
            XmlDataType::Boolean
                | XmlDataType::UnsignedByte
                | XmlDataType::Short
                | XmlDataType::Integer
                | XmlDataType::Long
                | XmlDataType::String
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            XmlDataType::UnsignedByte | XmlDataType::Short | XmlDataType::Integer | XmlDataType::Long
        )
    }
}

/// Map an XS builtin local name (no prefix) to its value type.
pub(crate) fn xs_builtin_type(local: &str) -> Option<XmlDataType> {
    Some(match local {
        "boolean" => XmlDataType::Boolean,
        "unsignedByte" => XmlDataType::UnsignedByte,
        "short" => XmlDataType::Short,
        "int" | "integer" => XmlDataType::Integer,
        "long" => XmlDataType::Long,
        "string" | "anyURI" | "dateTime" | "base64Binary" => XmlDataType::String,
        _ => return None,
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ElemId(pub(crate) usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CtId(pub(crate) usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StId(pub(crate) usize);

/// How an element's content is defined.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElemBody {
    /// An XS builtin; the element's `data_type` says which.
    XsType,
    Simple(StId),
    Complex(CtId),
    Any {
        namespace: AnyNamespace,
        process: ProcessContents,
    },
    /// Named type reference waiting for the link pass.
    Unresolved,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnyNamespace {
    /// `##any`
    Any,
    /// `##other`
    Other,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessContents {
    Lax,
    Skip,
}

/// Ordering discipline of a complex type's children.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    All,
    Sequence,
    Choice,
}

#[derive(Debug)]
pub struct XsdElement {
    pub name: String,
    pub type_name: Option<String>,
    pub min_occurs: u32,
    /// -1 is unbounded.
    pub max_occurs: i64,
    pub qualified: bool,
    pub default_value: Option<String>,
    pub fixed: Option<String>,
    pub data_type: XmlDataType,
    pub body: ElemBody,
}

impl XsdElement {
    /// Carries a directly-typed value: XS builtin or simple type.
    pub fn is_simple_kind(&self) -> bool {
        self.data_type.is_xs_builtin() || self.data_type == XmlDataType::Simple
    }

    pub fn is_any(&self) -> bool {
        matches!(self.body, ElemBody::Any { .. })
    }

    /// The value a default-synthesis pass should emit: fixed wins over default.
    pub fn synthesized_value(&self) -> Option<&str> {
        self.fixed.as_deref().or(self.default_value.as_deref())
    }
}

#[derive(Debug)]
pub struct ComplexType {
    pub type_name: Option<String>,
    /// Captured, not enforced.
    pub is_mixed: bool,
    pub disposition: Disposition,
    pub elements: Vec<ElemId>,
}

/// A simple-type restriction facet.  The parse-and-ignore set (pattern, whiteSpace,
/// fractionDigits) is logged at schema parse and never stored.
#[derive(Clone, Debug, PartialEq)]
pub enum Facet {
    Length(u64),
    MinLength(u64),
    MaxLength(u64),
    MinInclusive(u64),
    MaxInclusive(u64),
    MinExclusive(u64),
    MaxExclusive(u64),
    TotalDigits(u32),
    EnumNum(u64),
    EnumStr(String),
}

#[derive(Debug)]
pub struct SimpleType {
    pub type_name: Option<String>,
    pub base: XmlDataType,
    pub facets: ListPlus<Facet>,
}

/// A parsed schema: one root element plus the arenas behind it.  Immutable once linked, safe to
/// share across concurrent validations.
#[derive(Debug)]
pub struct Schema {
    pub(crate) elements: Vec<XsdElement>,
    pub(crate) complex: Vec<ComplexType>,
    pub(crate) simple: Vec<SimpleType>,
    pub(crate) root: ElemId,
    pub(crate) target_ns: Option<String>,
}

impl Schema {
    pub fn root(&self) -> ElemId {
        self.root
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_ns.as_deref()
    }

    pub fn elem(&self, id: ElemId) -> &XsdElement {
        &self.elements[id.0]
    }

    pub fn complex_type(&self, id: CtId) -> &ComplexType {
        &self.complex[id.0]
    }

    pub fn simple_type(&self, id: StId) -> &SimpleType {
        &self.simple[id.0]
    }

    fn complex_by_name(&self, name: &str) -> Option<CtId> {
        self.complex
            .iter()
            .position(|ct| ct.type_name.as_deref() == Some(name))
            .map(CtId)
    }

    fn simple_by_name(&self, name: &str) -> Option<StId> {
        self.simple
            .iter()
            .position(|st| st.type_name.as_deref() == Some(name))
            .map(StId)
    }

    /// Resolve named type references and verify the element tree, root first.
    ///
    /// Idempotent: a second run finds nothing unresolved and re-verifies the same tree.
    pub fn link(&mut self) -> Result<()> {
        for i in 0..self.elements.len() {
            if self.elements[i].body != ElemBody::Unresolved {
                continue;
            }
            let name = self.elements[i]
                .type_name
                .clone()
                .ok_or_else(|| Error::invalid(format!(
                    "element '{}' has neither a type name nor an inline type",
                    self.elements[i].name
                )))?;
            // Strip a namespace prefix if present; global types are registered by local name.
            let local = name.rsplit(':').next().unwrap_or(&name).to_string();

            if let Some(ct) = self.complex_by_name(&local) {
                self.elements[i].body = ElemBody::Complex(ct);
                self.elements[i].data_type = XmlDataType::Complex;
            } else if let Some(st) = self.simple_by_name(&local) {
                self.elements[i].body = ElemBody::Simple(st);
                self.elements[i].data_type = XmlDataType::Simple;
            } else {
                return Err(Error::invalid(format!(
                    "element '{}' references undefined type '{}'",
                    self.elements[i].name, name
                )));
            }
        }

        self.check_cycles()
    }

    /// A complex type may not transitively contain itself along an instance axis.
    fn check_cycles(&self) -> Result<()> {
        let mut path: Vec<CtId> = Vec::new();
        self.visit(self.root, &mut path)
    }

    fn visit(&self, elem: ElemId, path: &mut Vec<CtId>) -> Result<()> {
        let e = self.elem(elem);
        let ElemBody::Complex(ct) = e.body else {
            return Ok(());
        };
        if path.contains(&ct) {
            return Err(Error::invalid(format!(
                "complex type '{}' transitively contains itself through element '{}'",
                self.complex_type(ct)
                    .type_name
                    .as_deref()
                    .unwrap_or("<anonymous>"),
                e.name
            )));
        }
        path.push(ct);
        for &child in &self.complex_type(ct).elements {
            self.visit(child, path)?;
        }
        path.pop();
        Ok(())
    }

    /// Locate child `tag` of a complex type; returns the child's list index too.
    pub(crate) fn child_by_tag(&self, ct: CtId, tag: &str) -> Option<(ElemId, usize)> {
        self.complex_type(ct)
            .elements
            .iter()
            .position(|&c| self.elem(c).name == tag)
            .map(|idx| (self.complex_type(ct).elements[idx], idx))
    }

    pub(crate) fn has_any_child(&self, ct: CtId) -> bool {
        self.complex_type(ct)
            .elements
            .iter()
            .any(|&c| self.elem(c).is_any())
    }

    pub(crate) fn log_summary(&self) {
        log::debug!(
            target: LM_XMLP,
            "schema: root '{}', {} elements, {} complex types, {} simple types",
            self.elem(self.root).name,
            self.elements.len(),
            self.complex.len(),
            self.simple.len()
        );
    }
}
