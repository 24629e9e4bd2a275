//! The XML validator: a stack of schema pointers driven by the tag reader.
//!
//! Every open tag is located among the children of the enclosing complex type and its occurrence
//! counters updated; simple-typed opens remember where their value starts; closes pop the stack,
//! enforce the ordering discipline of the complex type being left, coerce and facet-check the
//! captured value, and emit the callback.  A complex type holding an xs:any wildcard switches
//! the walk into processing-any mode for the unmatched subtree: arbitrary well-formed content,
//! no schema checks, leaf text delivered as strings.
//!
//! Any failure wraps as [Error::InvalidValue] with the byte position of the offending tag logged.

use crate::error::{Error, Result};
use crate::logging::LM_XMLP;
use crate::mbuf::MBuf;
use crate::pl::Pl;
use crate::xml::schema::{CtId, Disposition, ElemBody, ElemId, Schema, XmlDataType};
use crate::xml::stype::{convert_simple_value, convert_xs_value};
use crate::xml::tags::{parse_first_tag, parse_tag, TagInfo};
use crate::xml::{CallbackInfo, OwnedXmlValue, XmlEvent, XmlValue};

/// Validate `buf` against `schema`, emitting events through `cb`.
pub fn validate(buf: &mut MBuf, schema: &Schema, cb: &mut CallbackInfo<'_>) -> Result<()> {
    Validator {
        buf,
        schema,
        cb,
        stack: Vec::new(),
        cur_parent: None,
        processing_any: false,
        done: false,
    }
    .run()
}

enum StackEntry {
    /// An element from the schema tree.
    Schema(ElemId),
    /// An element synthesized inside processing-any mode.
    Any {
        name: String,
        is_root_any: bool,
        is_leaf: bool,
    },
}

struct ElemPointer {
    entry: StackEntry,
    /// Stack index of the enclosing complex element at open time.
    parent: Option<usize>,
    /// For complex entries: the highest child index matched so far (sequence discipline).
    cur_idx: usize,
    /// For complex entries: per-child match counters.
    assigned: Vec<u32>,
    /// For value-carrying entries: where the content started in the buffer.
    value_start: Option<usize>,
}

struct Validator<'v, 'cb> {
    buf: &'v mut MBuf,
    schema: &'v Schema,
    cb: &'v mut CallbackInfo<'cb>,
    stack: Vec<ElemPointer>,
    cur_parent: Option<usize>,
    processing_any: bool,
    done: bool,
}

impl Validator<'_, '_> {
    fn run(&mut self) -> Result<()> {
        parse_first_tag(self.buf)?;

        while !self.done {
            let Some(tag) = parse_tag(self.buf)? else {
                break;
            };
            let name = tag.name_str(self.buf).to_string();
            if tag.is_end {
                self.handle_close(&tag, &name)?;
            } else if tag.is_self_closing {
                self.handle_self_closing(&tag, &name)?;
            } else {
                self.handle_open(&tag, &name)?;
            }
        }

        if !self.done {
            return Err(invalid_at(
                self.buf.pos(),
                "document ended before the root element closed",
            ));
        }

        // Only whitespace belongs after the root close; anything else is logged and skipped.
        if self.buf.cur_bytes().iter().any(|b| !b.is_ascii_whitespace()) {
            log::error!(
                target: LM_XMLP,
                "content in the trailing section at byte {}, ignored",
                self.buf.pos()
            );
        }
        Ok(())
    }

    /// The complex type behind the stack entry at `idx`.
    fn ct_of(&self, idx: usize) -> Result<CtId> {
        match self.stack[idx].entry {
            StackEntry::Schema(id) => match self.schema.elem(id).body {
                ElemBody::Complex(ct) => Ok(ct),
                _ => Err(Error::invalid("enclosing element is not a complex type")),
            },
            StackEntry::Any { .. } => Err(Error::invalid("enclosing element is a wildcard")),
        }
    }

    fn handle_open(&mut self, tag: &TagInfo, name: &str) -> Result<()> {
        let entry = match self.cur_parent {
            None => {
                let root = self.schema.root();
                if self.schema.elem(root).name != name {
                    return Err(invalid_at(
                        tag.start_pos,
                        &format!("'{name}' does not match the schema root"),
                    ));
                }
                StackEntry::Schema(root)
            }
            Some(_) if self.processing_any => {
                self.mark_enclosing_any_not_leaf();
                StackEntry::Any {
                    name: name.to_string(),
                    is_root_any: false,
                    is_leaf: true,
                }
            }
            Some(parent_idx) => {
                let parent_ct = self.ct_of(parent_idx)?;
                match self.schema.child_by_tag(parent_ct, name) {
                    Some((child, idx)) => {
                        self.occurrence_bookkeeping(parent_idx, parent_ct, idx, tag.start_pos)?;
                        StackEntry::Schema(child)
                    }
                    None if self.schema.has_any_child(parent_ct) => {
                        log::debug!(
                            target: LM_XMLP,
                            "tag '{name}' enters processing-any mode"
                        );
                        self.processing_any = true;
                        StackEntry::Any {
                            name: name.to_string(),
                            is_root_any: true,
                            is_leaf: true,
                        }
                    }
                    None => {
                        return Err(invalid_at(
                            tag.start_pos,
                            &format!("the schema admits no element '{name}' here"),
                        ));
                    }
                }
            }
        };

        let mut pointer = ElemPointer {
            entry,
            parent: self.cur_parent,
            cur_idx: 0,
            assigned: Vec::new(),
            value_start: None,
        };

        // Simple-typed and wildcard elements capture a value and stay leaves; complex ones
        // become the new enclosing parent.
        let complex_ct = match &pointer.entry {
            StackEntry::Schema(id) => {
                let elem = self.schema.elem(*id);
                if elem.is_simple_kind() {
                    None
                } else if let ElemBody::Complex(ct) = &elem.body {
                    Some(*ct)
                } else {
                    return Err(invalid_at(
                        tag.start_pos,
                        &format!("element '{name}' has no usable type"),
                    ));
                }
            }
            StackEntry::Any { .. } => None,
        };

        match complex_ct {
            Some(ct) => {
                pointer.assigned = vec![0; self.schema.complex_type(ct).elements.len()];
                self.stack.push(pointer);
                self.cur_parent = Some(self.stack.len() - 1);
            }
            None => {
                pointer.value_start = Some(self.buf.pos());
                self.stack.push(pointer);
            }
        }
        Ok(())
    }

    /// Ordering, gap, and occurrence checks for matching child `idx` of the complex type held by
    /// stack entry `parent_idx`.
    fn occurrence_bookkeeping(
        &mut self,
        parent_idx: usize,
        parent_ct: CtId,
        idx: usize,
        at: usize,
    ) -> Result<()> {
        let schema = self.schema;
        let ct = schema.complex_type(parent_ct);
        let child = schema.elem(ct.elements[idx]);

        match ct.disposition {
            Disposition::Sequence => {
                let cur = self.stack[parent_idx].cur_idx;
                if idx < cur {
                    return Err(invalid_at(
                        at,
                        &format!("element '{}' out of sequence order", child.name),
                    ));
                }
                if idx > cur {
                    for k in cur..idx {
                        if self.stack[parent_idx].assigned[k] != 0 {
                            continue;
                        }
                        let skipped = schema.elem(ct.elements[k]);
                        if skipped.is_any() {
                            continue;
                        }
                        if skipped.min_occurs > 0 {
                            return Err(invalid_at(
                                at,
                                &format!(
                                    "mandatory element '{}' is missing before '{}'",
                                    skipped.name, child.name
                                ),
                            ));
                        }
                        if self.cb.is_use_default {
                            browse_node(schema, self.cb, ct.elements[k])?;
                        }
                    }
                    self.stack[parent_idx].cur_idx = idx;
                }
            }
            Disposition::Choice => {
                let other_assigned = self.stack[parent_idx]
                    .assigned
                    .iter()
                    .enumerate()
                    .any(|(j, &n)| j != idx && n > 0);
                if other_assigned {
                    return Err(invalid_at(
                        at,
                        &format!(
                            "element '{}' joins a choice that already made its pick",
                            child.name
                        ),
                    ));
                }
            }
            Disposition::All => {}
        }

        self.stack[parent_idx].assigned[idx] += 1;
        let seen = self.stack[parent_idx].assigned[idx];
        if child.max_occurs != -1 && seen as i64 > child.max_occurs {
            return Err(invalid_at(
                at,
                &format!(
                    "element '{}' occurs {seen} times, maxOccurs is {}",
                    child.name, child.max_occurs
                ),
            ));
        }
        Ok(())
    }

    /// `<name …/>`: occurrence bookkeeping only, no value, nothing pushed.
    fn handle_self_closing(&mut self, tag: &TagInfo, name: &str) -> Result<()> {
        if self.processing_any {
            // Part of a well-formed wildcard subtree; nothing to track.
            self.mark_enclosing_any_not_leaf();
            return Ok(());
        }
        let Some(parent_idx) = self.cur_parent else {
            log::debug!(target: LM_XMLP, "self-closing '{name}' outside any element, ignored");
            return Ok(());
        };
        let parent_ct = self.ct_of(parent_idx)?;
        match self.schema.child_by_tag(parent_ct, name) {
            Some((_, idx)) => self.occurrence_bookkeeping(parent_idx, parent_ct, idx, tag.start_pos),
            None if self.schema.has_any_child(parent_ct) => Ok(()),
            None => Err(invalid_at(
                tag.start_pos,
                &format!("the schema admits no element '{name}' here"),
            )),
        }
    }

    fn handle_close(&mut self, tag: &TagInfo, name: &str) -> Result<()> {
        let popped = self.stack.pop().ok_or_else(|| {
            invalid_at(tag.start_pos, &format!("close '{name}' without a matching open"))
        })?;

        // Leaving a complex element: its index was the current parent, and its close is where
        // its content model's postconditions get enforced.
        if popped.parent != self.cur_parent {
            self.enforce_postconditions(&popped, tag.start_pos)?;
            self.cur_parent = popped.parent;
        }

        let popped_name = match &popped.entry {
            StackEntry::Schema(id) => self.schema.elem(*id).name.as_str(),
            StackEntry::Any { name, .. } => name.as_str(),
        };
        if popped_name != name {
            return Err(invalid_at(
                tag.start_pos,
                &format!("close '{name}' does not match open '{popped_name}'"),
            ));
        }

        match &popped.entry {
            StackEntry::Schema(id) => {
                let elem = self.schema.elem(*id);
                if elem.is_simple_kind() {
                    let start = popped.value_start.expect("simple open captured a start");
                    let raw = &self.buf.bytes()[start..tag.start_pos];
                    let (value, concrete) = match &elem.body {
                        ElemBody::Simple(st) => {
                            let st = self.schema.simple_type(*st);
                            (convert_simple_value(st, raw)?, st.base)
                        }
                        _ => (convert_xs_value(elem.data_type, raw)?, elem.data_type),
                    };
                    emit_event(self.cb, &elem.name, elem.data_type, concrete, value, true)?;
                } else {
                    emit_event(
                        self.cb,
                        &elem.name,
                        elem.data_type,
                        XmlDataType::Complex,
                        XmlValue::None,
                        false,
                    )?;
                }
            }
            StackEntry::Any {
                name: any_name,
                is_root_any,
                is_leaf,
            } => {
                if *is_leaf {
                    let start = popped.value_start.expect("any open captured a start");
                    let raw = &self.buf.bytes()[start..tag.start_pos];
                    emit_event(
                        self.cb,
                        any_name,
                        XmlDataType::Any,
                        XmlDataType::String,
                        XmlValue::Str(Pl::new(raw)),
                        true,
                    )?;
                } else {
                    emit_event(
                        self.cb,
                        any_name,
                        XmlDataType::Any,
                        XmlDataType::String,
                        XmlValue::None,
                        false,
                    )?;
                }
                if *is_root_any {
                    self.processing_any = false;
                }
            }
        }

        if self.stack.is_empty() {
            log::debug!(target: LM_XMLP, "document walk complete");
            self.done = true;
        }
        Ok(())
    }

    /// Postconditions of the complex type being left: `all` wants every mandatory child seen,
    /// `choice` wants exactly one pick, `sequence` wants no mandatory child missing after the
    /// last matched index.  Absent optional children get their defaults synthesized here.
    fn enforce_postconditions(&mut self, popped: &ElemPointer, at: usize) -> Result<()> {
        let StackEntry::Schema(id) = &popped.entry else {
            return Ok(());
        };
        let ElemBody::Complex(ct_id) = &self.schema.elem(*id).body else {
            return Err(invalid_at(at, "enclosing element is not a complex type"));
        };
        let ct_id = *ct_id;
        let schema = self.schema;
        let ct = schema.complex_type(ct_id);

        match ct.disposition {
            Disposition::All => {
                for (i, &child_id) in ct.elements.iter().enumerate() {
                    if popped.assigned[i] != 0 {
                        continue;
                    }
                    let child = schema.elem(child_id);
                    if child.is_any() {
                        continue;
                    }
                    if child.min_occurs > 0 {
                        return Err(invalid_at(
                            at,
                            &format!("mandatory element '{}' is missing", child.name),
                        ));
                    }
                    if self.cb.is_use_default {
                        browse_node(schema, self.cb, child_id)?;
                    }
                }
            }
            Disposition::Choice => {
                let picks = popped.assigned.iter().filter(|&&n| n > 0).count();
                if picks != 1 {
                    return Err(invalid_at(
                        at,
                        &format!("choice requires exactly one member, saw {picks}"),
                    ));
                }
            }
            Disposition::Sequence => {
                // Interior gaps were handled as later members arrived; what remains is the tail
                // after the last match (or the whole list when nothing matched).
                let start = if popped.assigned.get(popped.cur_idx).is_some_and(|&n| n > 0) {
                    popped.cur_idx + 1
                } else {
                    0
                };
                for i in start..ct.elements.len() {
                    if popped.assigned[i] != 0 {
                        continue;
                    }
                    let child = schema.elem(ct.elements[i]);
                    if child.is_any() {
                        continue;
                    }
                    if child.min_occurs > 0 {
                        return Err(invalid_at(
                            at,
                            &format!("mandatory element '{}' is missing", child.name),
                        ));
                    }
                    if self.cb.is_use_default {
                        browse_node(schema, self.cb, ct.elements[i])?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Opening a nested element inside an any subtree turns the enclosing any element into a
    /// branch node.
    fn mark_enclosing_any_not_leaf(&mut self) {
        if let Some(ElemPointer {
            entry: StackEntry::Any { is_leaf, .. },
            ..
        }) = self.stack.last_mut()
        {
            *is_leaf = false;
        }
    }
}

/// Synthesize callbacks for an element absent from the document: a simple-typed element emits
/// its fixed or default value (fixed wins), a complex one recurses into its children.  The
/// value comes from the schema itself, so facet checks are not repeated here.
fn browse_node(schema: &Schema, cb: &mut CallbackInfo<'_>, elem_id: ElemId) -> Result<()> {
    let elem = schema.elem(elem_id);
    match &elem.body {
        ElemBody::XsType | ElemBody::Simple(_) => {
            let Some(text) = elem.synthesized_value() else {
                return Ok(());
            };
            let base = match &elem.body {
                ElemBody::Simple(st) => schema.simple_type(*st).base,
                _ => elem.data_type,
            };
            let value = convert_xs_value(base, text.as_bytes())?;
            emit_event(cb, &elem.name, elem.data_type, base, value, true)
        }
        ElemBody::Complex(ct) => {
            for &child in &schema.complex_type(*ct).elements {
                browse_node(schema, cb, child)?;
            }
            Ok(())
        }
        ElemBody::Any { .. } => Ok(()),
        ElemBody::Unresolved => Err(Error::invalid("unlinked element in default synthesis")),
    }
}

/// Route one event through the callback contract: leaf filtering, the expected-element table
/// with its declared-type check, and callback-or-store delivery.
fn emit_event(
    cb: &mut CallbackInfo<'_>,
    name: &str,
    declared: XmlDataType,
    concrete: XmlDataType,
    value: XmlValue<'_>,
    is_leaf: bool,
) -> Result<()> {
    if !is_leaf && cb.is_leaf_only {
        return Ok(());
    }

    let event = XmlEvent {
        name,
        value,
        data_type: concrete,
    };

    if cb.expected.is_empty() {
        if let Some(f) = cb.callback.as_mut() {
            f(&event);
        }
        return Ok(());
    }

    let Some(entry) = cb.expected.iter_mut().find(|e| e.name == name) else {
        log::debug!(target: LM_XMLP, "element '{name}' not expected by the application");
        return Ok(());
    };

    // Wildcard elements have no declared type to check against.
    if declared != XmlDataType::Any && entry.data_type != declared {
        return Err(Error::invalid(format!(
            "element '{name}' is declared {declared:?}, application expects {:?}",
            entry.data_type
        )));
    }

    match cb.callback.as_mut() {
        Some(f) => f(&event),
        None => entry.value = OwnedXmlValue::from_value(&event.value),
    }
    Ok(())
}

fn invalid_at(pos: usize, what: &str) -> Error {
    log::error!(target: LM_XMLP, "validation failure at byte {pos}: {what}");
    Error::invalid(format!("{what} (byte {pos})"))
}
