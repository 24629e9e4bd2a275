//! End-to-end XSD + XML scenarios.

use std::sync::Arc;

use premem::{PreMem, PreMemConfig};
use sigmid::mbuf::MBuf;
use sigmid::xml::{
    get_leaf_values, is_xml_valid, is_xsd_valid, validate, CallbackInfo, ExpectedData,
    OwnedXmlValue, Schema, XmlDataType, XmlValue,
};
use sigmid::Error;

fn pool() -> Arc<PreMem> {
    PreMem::new(PreMemConfig::compact())
}

fn mbuf(pool: &Arc<PreMem>, content: &str) -> MBuf {
    let mut mb = MBuf::alloc(pool, content.len().max(1)).unwrap();
    mb.write_str(content, false).unwrap();
    mb
}

const DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

fn xsd(body: &str) -> String {
    format!("{DECL}<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\">{body}</xs:schema>")
}

/// Collected shape of one event: name, rendered value, concrete type.
#[derive(Debug, PartialEq)]
struct Seen(String, String, XmlDataType);

fn run_collecting(xsd_doc: &str, xml_doc: &str, use_default: bool) -> (Result<(), Error>, Vec<Seen>) {
    let pool = pool();
    let schema = Schema::parse(&mut mbuf(&pool, xsd_doc)).unwrap();
    let mut events = Vec::new();
    let result = {
        let mut cb = CallbackInfo::with_callback(|e| {
            let rendered = match &e.value {
                XmlValue::None => String::new(),
                XmlValue::Bool(b) => b.to_string(),
                XmlValue::U64(n) => n.to_string(),
                XmlValue::Str(pl) => pl.to_string(),
            };
            events.push(Seen(e.name.to_string(), rendered, e.data_type));
        });
        cb.is_use_default = use_default;
        validate(&mut mbuf(&pool, xml_doc), &schema, &mut cb)
    };
    (result, events)
}

const SEQ_SCHEMA_BODY: &str = r#"
    <xs:complexType name="R">
      <xs:sequence>
        <xs:element name="n" type="xs:int"/>
        <xs:element name="s" type="xs:string" minOccurs="0" default="z"/>
      </xs:sequence>
    </xs:complexType>
    <xs:element name="r" type="R"/>
"#;

#[test]
fn sequence_happy_path_with_defaults() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>7</n></r>");
    let (result, events) = run_collecting(&schema, &doc, true);
    result.unwrap();
    assert_eq!(
        events,
        vec![
            Seen("n".into(), "7".into(), XmlDataType::Integer),
            Seen("s".into(), "z".into(), XmlDataType::String),
        ]
    );
}

#[test]
fn absent_defaults_stay_absent_without_the_flag() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>7</n></r>");
    let (result, events) = run_collecting(&schema, &doc, false);
    result.unwrap();
    assert_eq!(events, vec![Seen("n".into(), "7".into(), XmlDataType::Integer)]);
}

#[test]
fn missing_mandatory_element_fails() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><s>q</s></r>");
    let (result, _) = run_collecting(&schema, &doc, false);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
}

#[test]
fn sequence_order_violation_fails() {
    let schema = xsd(
        r#"
        <xs:complexType name="R">
          <xs:sequence>
            <xs:element name="a" type="xs:int"/>
            <xs:element name="b" type="xs:int"/>
          </xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    let doc = format!("{DECL}<r><b>1</b><a>2</a></r>");
    let (result, _) = run_collecting(&schema, &doc, false);
    assert!(result.is_err());
}

#[test]
fn choice_admits_exactly_one_member() {
    let choice_schema = xsd(
        r#"
        <xs:complexType name="R">
          <xs:choice>
            <xs:element name="n" type="xs:int"/>
            <xs:element name="s" type="xs:string"/>
          </xs:choice>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );

    let one = format!("{DECL}<r><n>7</n></r>");
    let (result, events) = run_collecting(&choice_schema, &one, false);
    result.unwrap();
    assert_eq!(events.len(), 1);

    // A second member is refused at its open tag: nothing further is delivered.
    let two = format!("{DECL}<r><n>7</n><s>q</s></r>");
    let (result, events) = run_collecting(&choice_schema, &two, false);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
    assert_eq!(events, vec![Seen("n".into(), "7".into(), XmlDataType::Integer)]);

    let zero = format!("{DECL}<r></r>");
    let (result, _) = run_collecting(&choice_schema, &zero, false);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
}

#[test]
fn all_disposition_is_order_free() {
    let schema = xsd(
        r#"
        <xs:complexType name="R">
          <xs:all>
            <xs:element name="a" type="xs:int"/>
            <xs:element name="b" type="xs:boolean"/>
          </xs:all>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    let doc = format!("{DECL}<r><b>true</b><a>4</a></r>");
    let (result, events) = run_collecting(&schema, &doc, false);
    result.unwrap();
    assert_eq!(
        events,
        vec![
            Seen("b".into(), "true".into(), XmlDataType::Boolean),
            Seen("a".into(), "4".into(), XmlDataType::Integer),
        ]
    );

    let missing = format!("{DECL}<r><b>true</b></r>");
    let (result, _) = run_collecting(&schema, &missing, false);
    assert!(result.is_err());
}

#[test]
fn max_occurs_is_enforced() {
    let schema = xsd(
        r#"
        <xs:complexType name="R">
          <xs:sequence>
            <xs:element name="n" type="xs:int" maxOccurs="2"/>
          </xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    let ok = format!("{DECL}<r><n>1</n><n>2</n></r>");
    assert!(run_collecting(&schema, &ok, false).0.is_ok());

    let over = format!("{DECL}<r><n>1</n><n>2</n><n>3</n></r>");
    assert!(run_collecting(&schema, &over, false).0.is_err());
}

#[test]
fn enumeration_facet_admits_only_listed_values() {
    let schema = xsd(
        r#"
        <xs:simpleType name="Transport">
          <xs:restriction base="xs:string">
            <xs:enumeration value="udp"/>
            <xs:enumeration value="tcp"/>
          </xs:restriction>
        </xs:simpleType>
        <xs:complexType name="R">
          <xs:sequence><xs:element name="t" type="Transport"/></xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    let ok = format!("{DECL}<r><t>udp</t></r>");
    let (result, events) = run_collecting(&schema, &ok, false);
    result.unwrap();
    assert_eq!(events, vec![Seen("t".into(), "udp".into(), XmlDataType::String)]);

    let bad = format!("{DECL}<r><t>sctp</t></r>");
    let (result, events) = run_collecting(&schema, &bad, false);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
    assert!(events.is_empty(), "no callback for a facet-violating value");
}

#[test]
fn numeric_bounds_facets() {
    let schema = xsd(
        r#"
        <xs:simpleType name="Port">
          <xs:restriction base="xs:int">
            <xs:minInclusive value="1024"/>
            <xs:maxInclusive value="65535"/>
          </xs:restriction>
        </xs:simpleType>
        <xs:complexType name="R">
          <xs:sequence><xs:element name="p" type="Port"/></xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    assert!(run_collecting(&schema, &format!("{DECL}<r><p>5060</p></r>"), false)
        .0
        .is_ok());
    assert!(run_collecting(&schema, &format!("{DECL}<r><p>80</p></r>"), false)
        .0
        .is_err());
}

#[test]
fn wildcard_subtrees_pass_through_as_strings() {
    let schema = xsd(
        r#"
        <xs:complexType name="R">
          <xs:sequence>
            <xs:element name="known" type="xs:int"/>
            <xs:any processContents="lax" minOccurs="0"/>
          </xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="R"/>
    "#,
    );
    let doc = format!(
        "{DECL}<r><known>1</known><vendor><tag>v1</tag><tag>v2</tag></vendor></r>"
    );
    let (result, events) = run_collecting(&schema, &doc, false);
    result.unwrap();
    assert_eq!(
        events,
        vec![
            Seen("known".into(), "1".into(), XmlDataType::Integer),
            Seen("tag".into(), "v1".into(), XmlDataType::String),
            Seen("tag".into(), "v2".into(), XmlDataType::String),
        ]
    );
}

#[test]
fn unknown_element_without_wildcard_fails() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>1</n><vendor>x</vendor></r>");
    let (result, _) = run_collecting(&schema, &doc, false);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
}

#[test]
fn close_tag_mismatch_fails() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>1</s></r>");
    let (result, _) = run_collecting(&schema, &doc, false);
    assert!(result.is_err());
}

#[test]
fn truncated_document_fails() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>1</n>");
    let (result, _) = run_collecting(&schema, &doc, false);
    assert!(result.is_err());
}

#[test]
fn trailing_whitespace_is_fine() {
    let schema = xsd(SEQ_SCHEMA_BODY);
    let doc = format!("{DECL}<r><n>1</n></r>\n\n  ");
    assert!(run_collecting(&schema, &doc, false).0.is_ok());
}

#[test]
fn expected_table_storage_mode() {
    let pool = pool();
    let schema_doc = xsd(SEQ_SCHEMA_BODY);
    let schema = Schema::parse(&mut mbuf(&pool, &schema_doc)).unwrap();

    let mut cb = CallbackInfo::new();
    cb.is_use_default = true;
    cb.expected = vec![
        ExpectedData::new("n", XmlDataType::Integer),
        ExpectedData::new("s", XmlDataType::String),
    ];

    let doc = format!("{DECL}<r><n>7</n></r>");
    validate(&mut mbuf(&pool, &doc), &schema, &mut cb).unwrap();

    assert_eq!(cb.expected[0].value, Some(OwnedXmlValue::U64(7)));
    assert_eq!(cb.expected[1].value, Some(OwnedXmlValue::Str("z".into())));
}

#[test]
fn expected_table_type_mismatch_fails() {
    let pool = pool();
    let schema_doc = xsd(SEQ_SCHEMA_BODY);
    let schema = Schema::parse(&mut mbuf(&pool, &schema_doc)).unwrap();

    let mut cb = CallbackInfo::new();
    cb.expected = vec![ExpectedData::new("n", XmlDataType::String)];

    let doc = format!("{DECL}<r><n>7</n></r>");
    let result = validate(&mut mbuf(&pool, &doc), &schema, &mut cb);
    assert!(matches!(result, Err(Error::InvalidValue { .. })));
}

#[test]
fn callbacks_follow_depth_first_leaf_order() {
    // Nested complex types: the callback sequence must match the depth-first left-to-right
    // traversal of the document restricted to simple-typed leaves.
    let schema = xsd(
        r#"
        <xs:complexType name="Inner">
          <xs:sequence>
            <xs:element name="x" type="xs:int"/>
            <xs:element name="y" type="xs:int"/>
          </xs:sequence>
        </xs:complexType>
        <xs:complexType name="Outer">
          <xs:sequence>
            <xs:element name="head" type="xs:string"/>
            <xs:element name="in" type="Inner" maxOccurs="unbounded"/>
            <xs:element name="tail" type="xs:string"/>
          </xs:sequence>
        </xs:complexType>
        <xs:element name="r" type="Outer"/>
    "#,
    );
    let doc = format!(
        "{DECL}<r><head>h</head><in><x>1</x><y>2</y></in><in><x>3</x><y>4</y></in><tail>t</tail></r>"
    );
    let (result, events) = run_collecting(&schema, &doc, false);
    result.unwrap();
    let names: Vec<&str> = events.iter().map(|s| s.0.as_str()).collect();
    assert_eq!(names, vec!["head", "x", "y", "x", "y", "tail"]);
    let values: Vec<&str> = events.iter().map(|s| s.1.as_str()).collect();
    assert_eq!(values, vec!["h", "1", "2", "3", "4", "t"]);
}

#[test]
fn file_level_helpers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = pool();
    let dir = std::env::temp_dir().join("sigmid-xml-e2e");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("conf.xsd"), xsd(SEQ_SCHEMA_BODY)).unwrap();
    std::fs::write(dir.join("conf.xml"), format!("{DECL}<r><n>40</n></r>")).unwrap();

    let mut seen = Vec::new();
    let mut cb = CallbackInfo::with_callback(|e| {
        if let XmlValue::U64(n) = e.value {
            seen.push((e.name.to_string(), n));
        }
    });
    get_leaf_values(&pool, &dir, "conf.xsd", "conf.xml", &mut cb).unwrap();
    drop(cb);
    assert_eq!(seen, vec![("n".to_string(), 40)]);

    let mut xsd_buf = MBuf::read_file(&pool, &dir.join("conf.xsd"), 64).unwrap();
    assert!(is_xsd_valid(&mut xsd_buf));

    let mut xml_buf = MBuf::read_file(&pool, &dir.join("conf.xml"), 64).unwrap();
    let mut xsd_buf = MBuf::read_file(&pool, &dir.join("conf.xsd"), 64).unwrap();
    let mut cb = CallbackInfo::new();
    assert!(is_xml_valid(&mut xml_buf, &mut xsd_buf, &mut cb));
}
