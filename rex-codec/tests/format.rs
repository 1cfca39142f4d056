//! Whole-format properties exercised through the public API: round trips,
//! canonical idempotence, index/scan agreement, and random access through
//! shared subtrees.

use rex_codec::{decode, encode, encode_with, get, DecodeError, EncodeOptions, Key, Value};

fn int(n: i64) -> Value {
    Value::Integer(n)
}

fn bare(s: &str) -> Value {
    Value::BareString(s.into())
}

fn raw(s: &str) -> Value {
    Value::RawString(s.into())
}

fn sample_values() -> Vec<Value> {
    vec![
        int(0),
        int(i64::MIN),
        int(i64::MAX),
        Value::Decimal { power: -6, significand: 1_000_001 },
        Value::Decimal { power: 3, significand: -5 },
        bare(""),
        bare("some-name_0"),
        raw(""),
        raw("text with spaces, [brackets] and ^ pointers"),
        raw("multi\nline\ttext \u{1F980}"),
        Value::Opcode(0),
        Value::Opcode(u32::MAX),
        Value::Reference(77),
        Value::Variable("x".into()),
        Value::Array(vec![]),
        Value::Object(vec![]),
        Value::Call(vec![]),
        Value::Array(vec![int(1), raw("two"), Value::Array(vec![int(3)])]),
        Value::Object(vec![
            (bare("size"), int(42)),
            (bare("color"), raw("red")),
            (int(9), Value::Array(vec![int(1), int(2)])),
        ]),
        Value::Call(vec![Value::Opcode(4), Value::Variable("x".into()), int(2)]),
        Value::Set {
            place: Box::new(Value::Variable("x".into())),
            value: Box::new(Value::Object(vec![(bare("a"), int(1))])),
        },
        Value::Delete { place: Box::new(Value::Call(vec![Value::Reference(1), bare("f")])) },
        Value::When {
            cond: Box::new(Value::Call(vec![Value::Opcode(1), Value::Variable("x".into())])),
            then: Box::new(Value::Array(vec![int(1)])),
            otherwise: Some(Box::new(Value::Unless {
                cond: Box::new(int(0)),
                then: Box::new(raw("no")),
                otherwise: None,
            })),
        },
        Value::Alt(vec![
            Value::All(vec![int(1), int(2)]),
            Value::Array(vec![raw("fallback")]),
        ]),
    ]
}

#[test]
fn every_sample_round_trips() {
    for value in sample_values() {
        let blob = encode(&value).unwrap();
        assert_eq!(decode(&blob).unwrap(), value, "blob {blob:?}");
    }
}

#[test]
fn encoding_is_idempotent_over_decode() {
    for value in sample_values() {
        let blob = encode(&value).unwrap();
        assert_eq!(encode(&decode(&blob).unwrap()).unwrap(), blob);
    }
}

#[test]
fn shared_subtrees_survive_aggressive_dedup() {
    let leaf = Value::Object(vec![(bare("n"), int(12)), (bare("s"), raw("shared text"))]);
    let branch = Value::Array(vec![leaf.clone(), leaf.clone()]);
    let value = Value::Object(vec![
        (bare("a"), branch.clone()),
        (bare("b"), branch.clone()),
        (bare("c"), Value::Array(vec![branch, leaf])),
    ]);
    let blob = encode(&value).unwrap();
    assert_eq!(decode(&blob).unwrap(), value);

    // the pointered rendering must stay well under the plain one
    let plain = encode_with(&value, &EncodeOptions { dedup: false, ..Default::default() }).unwrap();
    assert!(blob.len() < plain.len(), "{} !< {}", blob.len(), plain.len());
    assert_eq!(decode(&plain).unwrap(), value);
}

#[test]
fn indexed_and_plain_encodings_agree() {
    let value = Value::Array(
        (0..20)
            .map(|i| {
                Value::Object(vec![
                    (bare("id"), int(i)),
                    (bare("label"), raw(&format!("item {i}"))),
                ])
            })
            .collect(),
    );
    let plain = encode_with(
        &value,
        &EncodeOptions { index_min_len: usize::MAX, ..Default::default() },
    )
    .unwrap();
    let indexed = encode_with(&value, &EncodeOptions { index_min_len: 2, ..Default::default() }).unwrap();
    assert_ne!(plain, indexed);
    assert_eq!(decode(&plain).unwrap(), value);
    assert_eq!(decode(&indexed).unwrap(), value);

    for blob in [&plain, &indexed] {
        for i in 0..20 {
            assert_eq!(
                get(blob, &[Key::Index(i), Key::Name("id".into())]).unwrap(),
                int(i as i64)
            );
            assert_eq!(
                get(blob, &[Key::Index(i), Key::Name("label".into())]).unwrap(),
                raw(&format!("item {i}"))
            );
        }
        assert_eq!(
            get(blob, &[Key::Index(20)]),
            Err(DecodeError::KeyNotFound { step: 0 })
        );
    }
}

#[test]
fn object_index_lookup_matches_linear_scan() {
    let pairs: Vec<(Value, Value)> = (0..12)
        .map(|i| (bare(&format!("key{i:02}")), int(i * 11)))
        .collect();
    let value = Value::Object(pairs);
    let plain = encode_with(
        &value,
        &EncodeOptions { index_min_len: usize::MAX, ..Default::default() },
    )
    .unwrap();
    let indexed = encode(&value).unwrap();
    assert!(indexed.starts_with('#'));

    for i in 0..12 {
        let path = [Key::Name(format!("key{i:02}"))];
        assert_eq!(get(&indexed, &path).unwrap(), int(i * 11));
        assert_eq!(get(&plain, &path).unwrap(), int(i * 11));
    }
    assert_eq!(
        get(&indexed, &[Key::Name("missing".into())]),
        Err(DecodeError::KeyNotFound { step: 0 })
    );
}

#[test]
fn get_resolves_paths_through_pointers() {
    let shared = Value::Object(vec![(bare("color"), raw("red"))]);
    let value = Value::Array(vec![shared.clone(), shared]);
    let blob = encode(&value).unwrap();
    // element 0 is a pointer in the encoded form
    assert_eq!(
        get(&blob, &[Key::Index(0), Key::Name("color".into())]).unwrap(),
        raw("red")
    );
    assert_eq!(
        get(&blob, &[Key::Index(1), Key::Name("color".into())]).unwrap(),
        raw("red")
    );
}

#[test]
fn get_walks_nested_plain_structures() {
    let value = Value::Object(vec![(
        bare("rules"),
        Value::Array(vec![
            Value::Object(vec![(bare("color"), raw("red"))]),
            Value::Object(vec![(bare("color"), raw("blue"))]),
        ]),
    )]);
    let blob = encode(&value).unwrap();
    assert_eq!(
        get(&blob, &[Key::Name("rules".into()), Key::Index(1), Key::Name("color".into())]).unwrap(),
        raw("blue")
    );
    assert_eq!(
        get(&blob, &[Key::Name("rules".into()), Key::Index(2)]),
        Err(DecodeError::KeyNotFound { step: 1 })
    );
}

#[test]
fn duplicate_keys_in_plain_objects_resolve_to_the_first() {
    let value = Value::Object(vec![(bare("a"), int(1)), (bare("a"), int(2))]);
    let blob = encode_with(
        &value,
        &EncodeOptions { index_min_len: usize::MAX, ..Default::default() },
    )
    .unwrap();
    assert_eq!(get(&blob, &[Key::Name("a".into())]).unwrap(), int(1));
}

#[test]
fn deep_indexed_containers_nest() {
    let inner: Vec<Value> = (0..10).map(int).collect();
    let value = Value::Array((0..10).map(|_| Value::Array(inner.clone())).collect());
    let blob = encode(&value).unwrap();
    assert_eq!(decode(&blob).unwrap(), value);
    assert_eq!(get(&blob, &[Key::Index(9), Key::Index(9)]).unwrap(), int(9));
}

#[test]
fn structural_output_is_json_string_safe() {
    // Raw string content is carried verbatim and escapes like any JSON
    // text; everything else must never need escaping.
    let structural: Vec<Value> = sample_values()
        .into_iter()
        .filter(|v| !format!("{v}").contains('"'))
        .collect();
    assert!(structural.len() > 10);
    for value in structural {
        let blob = encode(&value).unwrap();
        for byte in blob.bytes() {
            assert!(
                !matches!(byte, b'"' | b'\\') && (0x20..0x7f).contains(&byte),
                "byte {byte:#x} in {blob:?} needs escaping inside a JSON string"
            );
        }
    }
}
