//! The XSD schema parser.
//!
//! One target namespace, one root element, global complex and simple types, restriction facets,
//! and xs:any wildcards — the subset the signaling configs actually use.  The `xs:` alias is
//! whatever prefix the schema tag binds to the XSD namespace (the empty prefix included); it is
//! memoized once at schema start and every later tag match uses it.

use crate::error::{Error, Result};
use crate::list::ListPlus;
use crate::logging::LM_XMLP;
use crate::mbuf::MBuf;
use crate::xml::schema::{
    xs_builtin_type, AnyNamespace, ComplexType, CtId, Disposition, ElemBody, ElemId,
    ProcessContents, Schema, SimpleType, StId, XmlDataType, XsdElement,
};
use crate::xml::tags::{parse_err, parse_first_tag, parse_tag, TagInfo};

const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

impl Schema {
    /// Parse an XSD document.  The returned schema is fully linked.
    pub fn parse(buf: &mut MBuf) -> Result<Schema> {
        let mut parser = XsdParser {
            buf,
            xs_alias: String::new(),
            elements: Vec::new(),
            complex: Vec::new(),
            simple: Vec::new(),
            target_ns: None,
        };
        parser.run()
    }
}

struct XsdParser<'b> {
    buf: &'b mut MBuf,
    xs_alias: String,
    elements: Vec<XsdElement>,
    complex: Vec<ComplexType>,
    simple: Vec<SimpleType>,
    target_ns: Option<String>,
}

impl XsdParser<'_> {
    fn run(&mut self) -> Result<Schema> {
        parse_first_tag(self.buf)?;
        self.parse_schema_tag()?;

        let mut root: Option<ElemId> = None;
        loop {
            let tag = self.read_tag()?;
            let name = tag.name_str(self.buf).to_string();

            if tag.is_end {
                if self.local(&name) == Some("schema") {
                    break;
                }
                return Err(parse_err(tag.start_pos, "unexpected close tag at schema level"));
            }

            match self.local(&name) {
                Some("element") => {
                    let id = self.parse_element(&tag)?;
                    if root.replace(id).is_some() {
                        return Err(parse_err(
                            tag.start_pos,
                            "a schema may declare only one root element",
                        ));
                    }
                }
                Some("complexType") => {
                    let id = self.parse_complex_type(&tag)?;
                    if self.complex[id.0].type_name.is_none() {
                        return Err(parse_err(
                            tag.start_pos,
                            "global complexType requires a name",
                        ));
                    }
                }
                Some("simpleType") => {
                    let id = self.parse_simple_type(&tag)?;
                    if self.simple[id.0].type_name.is_none() {
                        return Err(parse_err(tag.start_pos, "global simpleType requires a name"));
                    }
                }
                _ => {
                    return Err(parse_err(
                        tag.start_pos,
                        "unsupported construct at schema level",
                    ))
                }
            }
        }

        let root = root.ok_or_else(|| {
            Error::invalid("schema declares no root element".to_string())
        })?;

        let mut schema = Schema {
            elements: std::mem::take(&mut self.elements),
            complex: std::mem::take(&mut self.complex),
            simple: std::mem::take(&mut self.simple),
            root,
            target_ns: self.target_ns.take(),
        };
        schema.link()?;
        schema.log_summary();
        Ok(schema)
    }

    /// `<xs:schema …>`: memoize the alias bound to the XSD namespace, capture targetNamespace.
    fn parse_schema_tag(&mut self) -> Result<()> {
        let tag = self.read_tag()?;
        if tag.is_end || tag.is_self_closing {
            return Err(parse_err(tag.start_pos, "schema tag must open the document"));
        }

        let mut alias: Option<String> = None;
        for a in &tag.attrs {
            let name = std::str::from_utf8(&self.buf.bytes()[a.name.clone()]).unwrap_or("");
            let value = std::str::from_utf8(&self.buf.bytes()[a.value.clone()]).unwrap_or("");
            if value == XS_NAMESPACE {
                alias = Some(match name.strip_prefix("xmlns:") {
                    Some(p) => p.to_string(),
                    None if name == "xmlns" => String::new(),
                    _ => continue,
                });
            } else if name == "targetNamespace" {
                self.target_ns = Some(value.to_string());
            }
        }
        let alias = alias.ok_or_else(|| {
            parse_err(tag.start_pos, "schema does not bind the XSD namespace")
        })?;

        let tag_name = tag.name_str(self.buf);
        let (prefix, local) = split_prefix(tag_name);
        if local != "schema" || prefix != alias {
            return Err(parse_err(
                tag.start_pos,
                "document does not open with the schema tag of its XSD alias",
            ));
        }

        self.xs_alias = alias;
        log::debug!(
            target: LM_XMLP,
            "schema alias '{}', target namespace {:?}",
            self.xs_alias,
            self.target_ns
        );
        Ok(())
    }

    fn read_tag(&mut self) -> Result<TagInfo> {
        parse_tag(self.buf)?
            .ok_or_else(|| parse_err(self.buf.pos(), "schema ends before its close tag"))
    }

    /// The local part of `tag` when its prefix is the memoized alias; None otherwise.
    fn local<'a>(&self, tag: &'a str) -> Option<&'a str> {
        let (prefix, local) = split_prefix(tag);
        (prefix == self.xs_alias).then_some(local)
    }

    fn occurs_attrs(&self, tag: &TagInfo) -> Result<(u32, i64)> {
        let min = match tag.attr(self.buf, "minOccurs") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| parse_err(tag.start_pos, "minOccurs is not a number"))?,
            None => 1,
        };
        let max = match tag.attr(self.buf, "maxOccurs") {
            Some("unbounded") => -1,
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| parse_err(tag.start_pos, "maxOccurs is not a number"))?,
            None => 1,
        };
        Ok((min, max))
    }

    fn parse_element(&mut self, tag: &TagInfo) -> Result<ElemId> {
        let name = tag
            .attr(self.buf, "name")
            .ok_or_else(|| parse_err(tag.start_pos, "element without a name"))?
            .to_string();
        let type_name = tag.attr(self.buf, "type").map(str::to_string);
        let (min_occurs, max_occurs) = self.occurs_attrs(tag)?;
        let qualified = tag.attr(self.buf, "form") == Some("qualified");
        let default_value = tag.attr(self.buf, "default").map(str::to_string);
        let fixed = tag.attr(self.buf, "fixed").map(str::to_string);

        let (mut data_type, mut body) = match &type_name {
            Some(t) => {
                let (prefix, local) = split_prefix(t);
                match (prefix == self.xs_alias).then(|| xs_builtin_type(local)).flatten() {
                    Some(dt) => (dt, ElemBody::XsType),
                    None => (XmlDataType::NoXs, ElemBody::Unresolved),
                }
            }
            None => (XmlDataType::Invalid, ElemBody::Unresolved),
        };

        if !tag.is_self_closing {
            loop {
                let sub = self.read_tag()?;
                let sub_name = sub.name_str(self.buf).to_string();
                if sub.is_end {
                    if self.local(&sub_name) == Some("element") {
                        break;
                    }
                    return Err(parse_err(sub.start_pos, "unexpected close tag in element"));
                }
                match self.local(&sub_name) {
                    Some("complexType") => {
                        if type_name.is_some() {
                            return Err(parse_err(
                                sub.start_pos,
                                "element carries both a type attribute and an inline type",
                            ));
                        }
                        let ct = self.parse_complex_type(&sub)?;
                        data_type = XmlDataType::Complex;
                        body = ElemBody::Complex(ct);
                    }
                    Some("simpleType") => {
                        if type_name.is_some() {
                            return Err(parse_err(
                                sub.start_pos,
                                "element carries both a type attribute and an inline type",
                            ));
                        }
                        let st = self.parse_simple_type(&sub)?;
                        data_type = XmlDataType::Simple;
                        body = ElemBody::Simple(st);
                    }
                    _ => {
                        return Err(parse_err(
                            sub.start_pos,
                            "unsupported construct inside element",
                        ))
                    }
                }
            }
        }

        if body == ElemBody::Unresolved && type_name.is_none() {
            return Err(parse_err(
                tag.start_pos,
                "element has neither a type attribute nor an inline type",
            ));
        }

        self.elements.push(XsdElement {
            name,
            type_name,
            min_occurs,
            max_occurs,
            qualified,
            default_value,
            fixed,
            data_type,
            body,
        });
        Ok(ElemId(self.elements.len() - 1))
    }

    /// `<xs:any namespace="##any|##other" processContents="lax|skip" …/>`, a wildcard child of a
    /// complex type.  `strict` has no schema to be strict against here and is rejected.
    fn parse_any(&mut self, tag: &TagInfo) -> Result<ElemId> {
        let namespace = match tag.attr(self.buf, "namespace") {
            None | Some("##any") => AnyNamespace::Any,
            Some("##other") => AnyNamespace::Other,
            Some(other) => {
                return Err(parse_err(
                    tag.start_pos,
                    &format!("unsupported any namespace '{other}'"),
                ))
            }
        };
        let process = match tag.attr(self.buf, "processContents") {
            None | Some("lax") => ProcessContents::Lax,
            Some("skip") => ProcessContents::Skip,
            Some("strict") => {
                return Err(parse_err(tag.start_pos, "processContents=\"strict\" is not supported"))
            }
            Some(other) => {
                return Err(parse_err(
                    tag.start_pos,
                    &format!("unknown processContents '{other}'"),
                ))
            }
        };
        let (min_occurs, max_occurs) = self.occurs_attrs(tag)?;

        if !tag.is_self_closing {
            let end = self.read_tag()?;
            let end_name = end.name_str(self.buf).to_string();
            if !end.is_end || self.local(&end_name) != Some("any") {
                return Err(parse_err(end.start_pos, "xs:any admits no content"));
            }
        }

        self.elements.push(XsdElement {
            name: String::new(),
            type_name: None,
            min_occurs,
            max_occurs,
            qualified: false,
            default_value: None,
            fixed: None,
            data_type: XmlDataType::Any,
            body: ElemBody::Any { namespace, process },
        });
        Ok(ElemId(self.elements.len() - 1))
    }

    fn parse_complex_type(&mut self, tag: &TagInfo) -> Result<CtId> {
        let type_name = tag.attr(self.buf, "name").map(str::to_string);
        let is_mixed = tag.attr(self.buf, "mixed") == Some("true");

        let mut disposition = Disposition::All;
        let mut disposition_seen = false;
        let mut in_disposition = false;
        let mut children: Vec<ElemId> = Vec::new();

        if !tag.is_self_closing {
            loop {
                let sub = self.read_tag()?;
                let sub_name = sub.name_str(self.buf).to_string();

                if sub.is_end {
                    match self.local(&sub_name) {
                        Some("complexType") => break,
                        Some("all" | "sequence" | "choice") if in_disposition => {
                            in_disposition = false;
                        }
                        _ => {
                            return Err(parse_err(
                                sub.start_pos,
                                "unexpected close tag in complexType",
                            ))
                        }
                    }
                    continue;
                }

                match self.local(&sub_name) {
                    Some(d @ ("all" | "sequence" | "choice")) if !sub.is_self_closing => {
                        if disposition_seen {
                            return Err(parse_err(
                                sub.start_pos,
                                "complexType with more than one content model",
                            ));
                        }
                        disposition = match d {
                            "all" => Disposition::All,
                            "sequence" => Disposition::Sequence,
                            _ => Disposition::Choice,
                        };
                        disposition_seen = true;
                        in_disposition = true;
                    }
                    Some("element") => children.push(self.parse_element(&sub)?),
                    Some("any") => children.push(self.parse_any(&sub)?),
                    _ => {
                        return Err(parse_err(
                            sub.start_pos,
                            "unsupported construct inside complexType",
                        ))
                    }
                }
            }
        }

        self.complex.push(ComplexType {
            type_name,
            is_mixed,
            disposition,
            elements: children,
        });
        Ok(CtId(self.complex.len() - 1))
    }

    fn parse_simple_type(&mut self, tag: &TagInfo) -> Result<StId> {
        let type_name = tag.attr(self.buf, "name").map(str::to_string);
        if tag.is_self_closing {
            return Err(parse_err(tag.start_pos, "empty simpleType"));
        }

        let mut base = XmlDataType::Invalid;
        let mut facets: ListPlus<crate::xml::schema::Facet> = ListPlus::new();

        loop {
            let sub = self.read_tag()?;
            let sub_name = sub.name_str(self.buf).to_string();

            if sub.is_end {
                match self.local(&sub_name) {
                    Some("simpleType") => break,
                    Some("restriction") => continue,
                    _ => {
                        return Err(parse_err(sub.start_pos, "unexpected close tag in simpleType"))
                    }
                }
            }

            match self.local(&sub_name) {
                Some("restriction") => {
                    let b = sub
                        .attr(self.buf, "base")
                        .ok_or_else(|| parse_err(sub.start_pos, "restriction without a base"))?;
                    let (prefix, local) = split_prefix(b);
                    base = (prefix == self.xs_alias)
                        .then(|| xs_builtin_type(local))
                        .flatten()
                        .ok_or_else(|| {
                            parse_err(
                                sub.start_pos,
                                "restriction base must be an XS builtin, not a derived type",
                            )
                        })?;
                }
                Some("union") => {
                    // Unions collapse to a plain string; the member list is not decomposed.
                    base = XmlDataType::String;
                    if !sub.is_self_closing {
                        self.skip_until_end("union")?;
                    }
                }
                Some(facet_name) => self.parse_facet(facet_name.to_string(), &sub, base, &mut facets)?,
                None => return Err(parse_err(sub.start_pos, "foreign tag inside simpleType")),
            }
        }

        if base == XmlDataType::Invalid {
            return Err(parse_err(
                tag.start_pos,
                "simpleType without a restriction or union",
            ));
        }

        self.simple.push(SimpleType {
            type_name,
            base,
            facets,
        });
        Ok(StId(self.simple.len() - 1))
    }

    fn parse_facet(
        &mut self,
        facet_name: String,
        tag: &TagInfo,
        base: XmlDataType,
        facets: &mut ListPlus<crate::xml::schema::Facet>,
    ) -> Result<()> {
        use crate::xml::schema::Facet;

        let supported = matches!(
            facet_name.as_str(),
            "length"
                | "minLength"
                | "maxLength"
                | "minInclusive"
                | "maxInclusive"
                | "minExclusive"
                | "maxExclusive"
                | "totalDigits"
                | "enumeration"
        );
        if !supported {
            log::warn!(
                target: LM_XMLP,
                "facet '{facet_name}' is parsed but not enforced, ignoring"
            );
            if !tag.is_self_closing {
                self.skip_until_end(&facet_name)?;
            }
            return Ok(());
        }

        let value = tag
            .attr(self.buf, "value")
            .ok_or_else(|| parse_err(tag.start_pos, "facet without a value"))?
            .to_string();

        let numeric = |v: &str| -> Result<u64> {
            v.parse::<u64>()
                .map_err(|_| parse_err(tag.start_pos, "facet value is not a number"))
        };

        let facet = match facet_name.as_str() {
            "length" => Facet::Length(numeric(&value)?),
            "minLength" => Facet::MinLength(numeric(&value)?),
            "maxLength" => Facet::MaxLength(numeric(&value)?),
            "minInclusive" => Facet::MinInclusive(numeric(&value)?),
            "maxInclusive" => Facet::MaxInclusive(numeric(&value)?),
            "minExclusive" => Facet::MinExclusive(numeric(&value)?),
            "maxExclusive" => Facet::MaxExclusive(numeric(&value)?),
            "totalDigits" => Facet::TotalDigits(
                value
                    .parse::<u32>()
                    .map_err(|_| parse_err(tag.start_pos, "totalDigits is not a number"))?,
            ),
            "enumeration" => {
                if base.is_numeric() {
                    Facet::EnumNum(numeric(&value)?)
                } else {
                    Facet::EnumStr(value)
                }
            }
            _ => unreachable!("filtered above"),
        };
        facets.push_back(facet);

        if !tag.is_self_closing {
            let end = self.read_tag()?;
            let end_name = end.name_str(self.buf).to_string();
            if !end.is_end || self.local(&end_name) != Some(facet_name.as_str()) {
                return Err(parse_err(end.start_pos, "facet admits no content"));
            }
        }
        Ok(())
    }

    /// Skip a subtree until the matching close of `local`, counting nested opens.
    fn skip_until_end(&mut self, local: &str) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let tag = self.read_tag()?;
            let name = tag.name_str(self.buf).to_string();
            if tag.is_end {
                if depth == 0 && self.local(&name) == Some(local) {
                    return Ok(());
                }
                depth = depth.saturating_sub(1);
            } else if !tag.is_self_closing {
                depth += 1;
            }
        }
    }
}

fn split_prefix(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((p, l)) => (p, l),
        None => ("", name),
    }
}
