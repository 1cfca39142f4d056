//! The canonical encoder. Encoding runs in passes over an interned node
//! graph: a plan pass decides which repeated subvalues become pointers, an
//! emission pass lays the output down as a stream of symbolic pieces, and a
//! fix-point pass settles the byte positions that pointer offsets, length
//! prefixes and index entries depend on. The passes exist because every one
//! of those fields sits *before* the bytes it measures.

use fxhash::{FxHashMap, FxHashSet};
use log::{debug, trace};

use crate::digits::{digit_len, is_digit, push_digits, push_fixed_digits, zigzag, ALPHABET};
use crate::error::EncodeError;
use crate::value::Value;

/// Widest offset an index entry can hold: three digits, 64^3 - 1 bytes.
const MAX_ENTRY_WIDTH: usize = 3;

/// Encoder policy. The defaults reproduce the canonical form; the
/// thresholds exist because pointers and indices have a per-use byte cost
/// that tiny values never amortize.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Emit pointers for repeated subvalues.
    pub dedup: bool,
    /// Minimum plain encoded size for a repeated subvalue to be pointered.
    pub dedup_min_size: usize,
    /// Minimum element (or pair) count for a container to carry an offset
    /// index.
    pub index_min_len: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { dedup: true, dedup_min_size: 2, index_min_len: 8 }
    }
}

/// Encodes a value with the default [`EncodeOptions`].
pub fn encode(value: &Value) -> Result<String, EncodeError> {
    encode_with(value, &EncodeOptions::default())
}

/// Encodes a value under an explicit policy.
pub fn encode_with(value: &Value, options: &EncodeOptions) -> Result<String, EncodeError> {
    let mut encoder = Encoder::new(options);
    let root = encoder.intern(value)?;
    encoder.mark_candidates();
    loop {
        encoder.reset_passes();
        encoder.plan(root);
        encoder.emit_value(root, false);
        match encoder.layout_and_render() {
            Ok(out) => {
                debug!(
                    "encoded {} unique nodes into {} bytes ({} pieces, {} indexed)",
                    encoder.nodes.len(),
                    out.len(),
                    encoder.pieces.len(),
                    encoder.tables.len(),
                );
                return Ok(out);
            }
            Err(Overrun::Index(owner)) => {
                trace!("index offsets on node {owner} outgrow three digits, re-encoding without it");
                encoder.banned.insert(owner);
            }
            Err(Overrun::Pointer(target)) => {
                trace!("every pointer to node {target} costs more than its literal, inlining it");
                encoder.candidate[target] = false;
            }
        }
    }
}

/// A settled layout that wants another encoding attempt.
enum Overrun {
    /// An index whose entries outgrow the widest field; ban the container.
    Index(Id),
    /// A dedup target whose pointers all cost more than writing it out;
    /// drop it from the candidate set.
    Pointer(Id),
}

type Id = usize;

/// A [`Value`] with its children replaced by interned ids. Two subtrees are
/// equal exactly when they intern to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Integer(i64),
    Decimal { power: i32, significand: i64 },
    Bare(String),
    Raw(String),
    Opcode(u32),
    Reference(u32),
    Variable(String),
    Array(Vec<Id>),
    Object(Vec<(Id, Id)>),
    Call(Vec<Id>),
    Set(Id, Id),
    Delete(Id),
    When(Id, Id, Option<Id>),
    Unless(Id, Id, Option<Id>),
    Alt(Vec<Id>),
    All(Vec<Id>),
}

impl NodeKey {
    fn is_container(&self) -> bool {
        !matches!(
            self,
            NodeKey::Integer(_)
                | NodeKey::Decimal { .. }
                | NodeKey::Bare(_)
                | NodeKey::Raw(_)
                | NodeKey::Opcode(_)
                | NodeKey::Reference(_)
                | NodeKey::Variable(_)
        )
    }
}

struct Node {
    key: NodeKey,
    /// Canonical encoding of this subtree alone, no dedup, no outer prefix.
    /// Doubles as the stored key bytes when the node keys an indexed object.
    plain: String,
    /// Bytes between opener and closer (or after the tag, for the forms
    /// without a closer). Parents render skip-position prefixes from this.
    body_len: usize,
    /// Occurrences in the input tree.
    count: usize,
}

/// One deferred fragment of output. `Len`, `Ptr` and `Entry` render digit
/// fields whose values are byte distances between piece boundaries; their
/// own rendered width feeds back into those positions, hence the fix-point.
enum Piece {
    Text(String),
    /// Digits of `pos[to] - pos[from]`.
    Len { from: usize, to: usize },
    /// Digits of the forward distance to `target`'s literal, then `^`.
    /// `at_skip` records whether the position would prefix an inlined
    /// container, which the layout's cost audit compares against.
    Ptr { target: Id, at_skip: bool },
    /// One fixed-width index entry: `pos[at] - pos[base]`.
    Entry { base: usize, at: usize, table: usize },
    /// The index's width digit.
    Width { table: usize },
}

struct Table {
    owner: Id,
}

struct Encoder<'a> {
    options: &'a EncodeOptions,
    nodes: Vec<Node>,
    ids: FxHashMap<NodeKey, Id>,
    /// Containers whose index entries overflowed the widest field.
    banned: FxHashSet<Id>,
    candidate: Vec<bool>,

    // per-attempt pass state
    emit_occ: Vec<usize>,
    planned_literal: Vec<bool>,
    seen: Vec<usize>,
    literal_at: Vec<usize>,
    pieces: Vec<Piece>,
    tables: Vec<Table>,
}

impl<'a> Encoder<'a> {
    fn new(options: &'a EncodeOptions) -> Self {
        Self {
            options,
            nodes: Vec::new(),
            ids: FxHashMap::default(),
            banned: FxHashSet::default(),
            candidate: Vec::new(),
            emit_occ: Vec::new(),
            planned_literal: Vec::new(),
            seen: Vec::new(),
            literal_at: Vec::new(),
            pieces: Vec::new(),
            tables: Vec::new(),
        }
    }

    // ---- intern pass -----------------------------------------------------

    fn intern(&mut self, value: &Value) -> Result<Id, EncodeError> {
        let key = match value {
            Value::Integer(n) => NodeKey::Integer(*n),
            Value::Decimal { power, significand } => {
                NodeKey::Decimal { power: *power, significand: *significand }
            }
            Value::BareString(s) => {
                if !s.bytes().all(is_digit) {
                    return Err(EncodeError::InvalidBareString(s.clone()));
                }
                NodeKey::Bare(s.clone())
            }
            Value::RawString(s) => NodeKey::Raw(s.clone()),
            Value::Opcode(n) => NodeKey::Opcode(*n),
            Value::Reference(n) => NodeKey::Reference(*n),
            Value::Variable(s) => {
                if !s.bytes().all(is_digit) {
                    return Err(EncodeError::InvalidVariable(s.clone()));
                }
                NodeKey::Variable(s.clone())
            }
            Value::Array(values) => NodeKey::Array(self.intern_all(values)?),
            Value::Object(pairs) => {
                let mut ids = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    ids.push((self.intern(key)?, self.intern(value)?));
                }
                NodeKey::Object(ids)
            }
            Value::Call(values) => NodeKey::Call(self.intern_all(values)?),
            Value::Set { place, value } => NodeKey::Set(self.intern(place)?, self.intern(value)?),
            Value::Delete { place } => NodeKey::Delete(self.intern(place)?),
            Value::When { cond, then, otherwise } => NodeKey::When(
                self.intern(cond)?,
                self.intern(then)?,
                otherwise.as_deref().map(|v| self.intern(v)).transpose()?,
            ),
            Value::Unless { cond, then, otherwise } => NodeKey::Unless(
                self.intern(cond)?,
                self.intern(then)?,
                otherwise.as_deref().map(|v| self.intern(v)).transpose()?,
            ),
            Value::Alt(values) => {
                if values.is_empty() {
                    return Err(EncodeError::EmptyAlternatives);
                }
                NodeKey::Alt(self.intern_all(values)?)
            }
            Value::All(values) => {
                if values.is_empty() {
                    return Err(EncodeError::EmptyAlternatives);
                }
                NodeKey::All(self.intern_all(values)?)
            }
        };
        Ok(self.insert(key))
    }

    fn intern_all(&mut self, values: &[Value]) -> Result<Vec<Id>, EncodeError> {
        values.iter().map(|v| self.intern(v)).collect()
    }

    fn insert(&mut self, key: NodeKey) -> Id {
        if let Some(&id) = self.ids.get(&key) {
            self.nodes[id].count += 1;
            return id;
        }
        let (plain, body_len) = self.render_plain(&key);
        let id = self.nodes.len();
        self.nodes.push(Node { key: key.clone(), plain, body_len, count: 1 });
        self.ids.insert(key, id);
        id
    }

    fn mark_candidates(&mut self) {
        self.candidate = self
            .nodes
            .iter()
            .map(|node| {
                self.options.dedup
                    && node.count > 1
                    && node.plain.len() >= self.options.dedup_min_size
            })
            .collect();
    }

    // ---- plain rendering -------------------------------------------------

    /// Appends a child at a skip position: containers get their length
    /// prefix, everything else is bare.
    fn push_plain_skip(&self, out: &mut String, id: Id) {
        let node = &self.nodes[id];
        if node.key.is_container() {
            push_digits(out, node.body_len as u64);
        }
        out.push_str(&node.plain);
    }

    fn push_plain(&self, out: &mut String, id: Id) {
        out.push_str(&self.nodes[id].plain);
    }

    /// The canonical dedup-free encoding of a node, plus its body length.
    /// Children are already interned, so this is a single O(children) pass.
    fn render_plain(&self, key: &NodeKey) -> (String, usize) {
        let mut out = String::new();
        let body_len = match key {
            NodeKey::Integer(n) => {
                push_digits(&mut out, zigzag(*n));
                out.push('+');
                0
            }
            NodeKey::Decimal { power, significand } => {
                push_digits(&mut out, zigzag(i64::from(*power)));
                out.push('*');
                push_digits(&mut out, zigzag(*significand));
                out.push('+');
                0
            }
            NodeKey::Bare(s) => {
                out.push_str(s);
                out.push(':');
                0
            }
            NodeKey::Raw(s) => {
                push_digits(&mut out, s.len() as u64);
                out.push(',');
                out.push_str(s);
                0
            }
            NodeKey::Opcode(n) => {
                push_digits(&mut out, u64::from(*n));
                out.push('%');
                0
            }
            NodeKey::Reference(n) => {
                push_digits(&mut out, u64::from(*n));
                out.push('@');
                0
            }
            NodeKey::Variable(s) => {
                out.push_str(s);
                out.push('$');
                0
            }
            NodeKey::Array(children) => {
                if children.len() >= self.options.index_min_len {
                    let elements: Vec<&str> =
                        children.iter().map(|&c| self.nodes[c].plain.as_str()).collect();
                    let mut offsets = Vec::with_capacity(children.len());
                    let mut at = 0;
                    for element in &elements {
                        offsets.push(at);
                        at += element.len();
                    }
                    if let Some(body) = render_plain_index(b'[', &offsets, &elements, &mut out) {
                        out.push(']');
                        return (out, body);
                    }
                }
                out.push('[');
                let body_start = out.len();
                for &child in children {
                    self.push_plain_skip(&mut out, child);
                }
                let body = out.len() - body_start;
                out.push(']');
                body
            }
            NodeKey::Object(pairs) => {
                if pairs.len() >= self.options.index_min_len && self.unique_keys(pairs) {
                    let mut elements = Vec::with_capacity(pairs.len() * 2);
                    let mut offsets = Vec::with_capacity(pairs.len());
                    let mut order: Vec<usize> = (0..pairs.len()).collect();
                    order.sort_by(|&a, &b| self.compare_keys(pairs[a].0, pairs[b].0));
                    let mut at = 0;
                    let mut key_offsets = vec![0; pairs.len()];
                    for (i, &(key, value)) in pairs.iter().enumerate() {
                        key_offsets[i] = at;
                        let key = self.nodes[key].plain.as_str();
                        let value = self.nodes[value].plain.as_str();
                        at += key.len() + value.len();
                        elements.push(key);
                        elements.push(value);
                    }
                    for &i in &order {
                        offsets.push(key_offsets[i]);
                    }
                    if let Some(body) = render_plain_index(b'{', &offsets, &elements, &mut out) {
                        out.push('}');
                        return (out, body);
                    }
                }
                out.push('{');
                let body_start = out.len();
                for &(key, value) in pairs {
                    self.push_plain(&mut out, key);
                    self.push_plain_skip(&mut out, value);
                }
                let body = out.len() - body_start;
                out.push('}');
                body
            }
            NodeKey::Call(children) => {
                out.push('(');
                let body_start = out.len();
                for &child in children {
                    self.push_plain(&mut out, child);
                }
                let body = out.len() - body_start;
                out.push(')');
                body
            }
            NodeKey::Set(place, value) => {
                out.push('=');
                let body_start = out.len();
                self.push_plain(&mut out, *place);
                self.push_plain(&mut out, *value);
                out.len() - body_start
            }
            NodeKey::Delete(place) => {
                out.push('~');
                let body_start = out.len();
                self.push_plain(&mut out, *place);
                out.len() - body_start
            }
            NodeKey::When(cond, then, otherwise) | NodeKey::Unless(cond, then, otherwise) => {
                out.push(if matches!(key, NodeKey::When(..)) { '?' } else { '!' });
                out.push('(');
                let body_start = out.len();
                self.push_plain(&mut out, *cond);
                self.push_plain_skip(&mut out, *then);
                if let Some(otherwise) = otherwise {
                    self.push_plain_skip(&mut out, *otherwise);
                }
                let body = out.len() - body_start;
                out.push(')');
                body
            }
            NodeKey::Alt(children) | NodeKey::All(children) => {
                out.push(if matches!(key, NodeKey::Alt(_)) { '|' } else { '&' });
                out.push('(');
                let body_start = out.len();
                for (i, &child) in children.iter().enumerate() {
                    if i == 0 {
                        self.push_plain(&mut out, child);
                    } else {
                        self.push_plain_skip(&mut out, child);
                    }
                }
                let body = out.len() - body_start;
                out.push(')');
                body
            }
        };
        (out, body_len)
    }

    // ---- plan pass -------------------------------------------------------

    /// Walks emission order in reverse, deciding which occurrence of each
    /// dedup candidate is emitted literally (the last one, so that every
    /// pointer runs forward) and how many occurrences survive into the
    /// output at all — occurrences inside a pointered subtree vanish with
    /// it. Visiting a node before its reversed children is close enough to
    /// true reverse order: the only misordered pairs are a node and its own
    /// descendants, and a value can never contain an equal value.
    fn plan(&mut self, id: Id) {
        if self.candidate[id] {
            self.emit_occ[id] += 1;
            if self.planned_literal[id] {
                return;
            }
            self.planned_literal[id] = true;
        }
        let children = self.emit_children(id);
        for child in children.into_iter().rev() {
            self.plan(child);
        }
    }

    /// Children in emission order. Keys of indexed objects are absent: they
    /// are stored as opaque canonical bytes so the sorted index can compare
    /// them, and so never participate in dedup.
    fn emit_children(&self, id: Id) -> Vec<Id> {
        match &self.nodes[id].key {
            NodeKey::Array(c) | NodeKey::Call(c) | NodeKey::Alt(c) | NodeKey::All(c) => c.clone(),
            NodeKey::Object(pairs) => {
                if self.is_indexed(id) {
                    pairs.iter().map(|&(_, v)| v).collect()
                } else {
                    pairs.iter().flat_map(|&(k, v)| [k, v]).collect()
                }
            }
            NodeKey::Set(a, b) => vec![*a, *b],
            NodeKey::Delete(a) => vec![*a],
            NodeKey::When(c, t, e) | NodeKey::Unless(c, t, e) => {
                let mut v = vec![*c, *t];
                v.extend(*e);
                v
            }
            _ => Vec::new(),
        }
    }

    fn is_indexed(&self, id: Id) -> bool {
        if self.banned.contains(&id) {
            return false;
        }
        match &self.nodes[id].key {
            NodeKey::Array(c) => c.len() >= self.options.index_min_len,
            NodeKey::Object(p) => p.len() >= self.options.index_min_len && self.unique_keys(p),
            _ => false,
        }
    }

    /// A sorted index over duplicate keys could never answer a lookup, so
    /// such objects stay unindexed and resolve to the first match by scan.
    fn unique_keys(&self, pairs: &[(Id, Id)]) -> bool {
        let mut seen = FxHashSet::default();
        pairs.iter().all(|&(key, _)| seen.insert(key))
    }

    /// The bytes an object index sorts by: a string key's decoded content,
    /// any other key's whole token. Ties between key kinds break on the
    /// token bytes, which the decoder disambiguates by kind.
    fn key_content(&self, id: Id) -> &[u8] {
        match &self.nodes[id].key {
            NodeKey::Bare(s) | NodeKey::Raw(s) => s.as_bytes(),
            _ => self.nodes[id].plain.as_bytes(),
        }
    }

    fn compare_keys(&self, a: Id, b: Id) -> std::cmp::Ordering {
        self.key_content(a)
            .cmp(self.key_content(b))
            .then_with(|| self.nodes[a].plain.cmp(&self.nodes[b].plain))
    }

    fn reset_passes(&mut self) {
        let n = self.nodes.len();
        self.emit_occ = vec![0; n];
        self.planned_literal = vec![false; n];
        self.seen = vec![0; n];
        self.literal_at = vec![0; n];
        self.pieces.clear();
        self.tables.clear();
    }

    // ---- emission pass ---------------------------------------------------

    /// Emits one occurrence of `id`. `skip_pos` is true at the positions the
    /// skip-prefix policy covers; only containers react to it.
    fn emit_value(&mut self, id: Id, skip_pos: bool) {
        if self.candidate[id] {
            self.seen[id] += 1;
            if self.seen[id] < self.emit_occ[id] {
                self.pieces.push(Piece::Ptr { target: id, at_skip: skip_pos });
                return;
            }
        }
        let start = self.pieces.len();
        let key = self.nodes[id].key.clone();
        match key {
            NodeKey::Integer(_)
            | NodeKey::Decimal { .. }
            | NodeKey::Bare(_)
            | NodeKey::Raw(_)
            | NodeKey::Opcode(_)
            | NodeKey::Reference(_)
            | NodeKey::Variable(_) => {
                self.pieces.push(Piece::Text(self.nodes[id].plain.clone()));
            }
            NodeKey::Array(children) => {
                if self.is_indexed(id) {
                    self.emit_indexed_array(id, &children, skip_pos);
                } else {
                    let prefix = self.push_prefix(skip_pos);
                    self.push_text("[");
                    let from = self.pieces.len();
                    for &child in &children {
                        self.emit_value(child, true);
                    }
                    let to = self.pieces.len();
                    self.push_text("]");
                    self.patch_prefix(prefix, from, to);
                }
            }
            NodeKey::Object(pairs) => {
                if self.is_indexed(id) {
                    self.emit_indexed_object(id, &pairs, skip_pos);
                } else {
                    let prefix = self.push_prefix(skip_pos);
                    self.push_text("{");
                    let from = self.pieces.len();
                    for &(key, value) in &pairs {
                        self.emit_value(key, false);
                        self.emit_value(value, true);
                    }
                    let to = self.pieces.len();
                    self.push_text("}");
                    self.patch_prefix(prefix, from, to);
                }
            }
            NodeKey::Call(children) => {
                let prefix = self.push_prefix(skip_pos);
                self.push_text("(");
                let from = self.pieces.len();
                for &child in &children {
                    self.emit_value(child, false);
                }
                let to = self.pieces.len();
                self.push_text(")");
                self.patch_prefix(prefix, from, to);
            }
            NodeKey::Set(place, value) => {
                let prefix = self.push_prefix(skip_pos);
                self.push_text("=");
                let from = self.pieces.len();
                self.emit_value(place, false);
                self.emit_value(value, false);
                let to = self.pieces.len();
                self.patch_prefix(prefix, from, to);
            }
            NodeKey::Delete(place) => {
                let prefix = self.push_prefix(skip_pos);
                self.push_text("~");
                let from = self.pieces.len();
                self.emit_value(place, false);
                let to = self.pieces.len();
                self.patch_prefix(prefix, from, to);
            }
            NodeKey::When(cond, then, otherwise) | NodeKey::Unless(cond, then, otherwise) => {
                let prefix = self.push_prefix(skip_pos);
                self.push_text(if matches!(self.nodes[id].key, NodeKey::When(..)) {
                    "?("
                } else {
                    "!("
                });
                let from = self.pieces.len();
                self.emit_value(cond, false);
                self.emit_value(then, true);
                if let Some(otherwise) = otherwise {
                    self.emit_value(otherwise, true);
                }
                let to = self.pieces.len();
                self.push_text(")");
                self.patch_prefix(prefix, from, to);
            }
            NodeKey::Alt(children) | NodeKey::All(children) => {
                let prefix = self.push_prefix(skip_pos);
                self.push_text(if matches!(self.nodes[id].key, NodeKey::Alt(_)) {
                    "|("
                } else {
                    "&("
                });
                let from = self.pieces.len();
                for (i, &child) in children.iter().enumerate() {
                    self.emit_value(child, i != 0);
                }
                let to = self.pieces.len();
                self.push_text(")");
                self.patch_prefix(prefix, from, to);
            }
        }
        if self.candidate[id] {
            self.literal_at[id] = start;
        }
    }

    fn emit_indexed_array(&mut self, id: Id, children: &[Id], skip_pos: bool) {
        let prefix = self.push_prefix(skip_pos);
        let mut head = String::from("#");
        push_digits(&mut head, children.len() as u64);
        head.push('[');
        self.pieces.push(Piece::Text(head));
        let from = self.pieces.len();
        let table = self.tables.len();
        self.tables.push(Table { owner: id });
        self.pieces.push(Piece::Width { table });
        let entries = self.pieces.len();
        for _ in children {
            self.pieces.push(Piece::Entry { base: 0, at: 0, table });
        }
        let base = self.pieces.len();
        let mut starts = Vec::with_capacity(children.len());
        for &child in children {
            starts.push(self.pieces.len());
            self.emit_value(child, false);
        }
        for (slot, &at) in starts.iter().enumerate() {
            self.pieces[entries + slot] = Piece::Entry { base, at, table };
        }
        let to = self.pieces.len();
        self.push_text("]");
        self.patch_prefix(prefix, from, to);
    }

    fn emit_indexed_object(&mut self, id: Id, pairs: &[(Id, Id)], skip_pos: bool) {
        let prefix = self.push_prefix(skip_pos);
        let mut head = String::from("#");
        push_digits(&mut head, pairs.len() as u64);
        head.push('{');
        self.pieces.push(Piece::Text(head));
        let from = self.pieces.len();
        let table = self.tables.len();
        self.tables.push(Table { owner: id });
        self.pieces.push(Piece::Width { table });
        let entries = self.pieces.len();
        for _ in pairs {
            self.pieces.push(Piece::Entry { base: 0, at: 0, table });
        }
        let base = self.pieces.len();
        let mut keyed: Vec<(Id, usize)> = Vec::with_capacity(pairs.len());
        for &(key, value) in pairs {
            let at = self.pieces.len();
            self.pieces.push(Piece::Text(self.nodes[key].plain.clone()));
            self.emit_value(value, false);
            keyed.push((key, at));
        }
        // entry order is the sort order of the decoded key content
        keyed.sort_by(|a, b| self.compare_keys(a.0, b.0));
        for (slot, &(_, at)) in keyed.iter().enumerate() {
            self.pieces[entries + slot] = Piece::Entry { base, at, table };
        }
        let to = self.pieces.len();
        self.push_text("}");
        self.patch_prefix(prefix, from, to);
    }

    fn push_text(&mut self, text: &str) {
        self.pieces.push(Piece::Text(text.to_owned()));
    }

    fn push_prefix(&mut self, skip_pos: bool) -> Option<usize> {
        skip_pos.then(|| {
            self.pieces.push(Piece::Len { from: 0, to: 0 });
            self.pieces.len() - 1
        })
    }

    fn patch_prefix(&mut self, prefix: Option<usize>, from: usize, to: usize) {
        if let Some(at) = prefix {
            self.pieces[at] = Piece::Len { from, to };
        }
    }

    // ---- layout fix-point and render -------------------------------------

    /// Settles every deferred field width, then renders. All widths start
    /// minimal and only ever grow, and every measured span only grows when
    /// widths do, so the loop terminates. An [`Overrun`] asks the caller to
    /// adjust (ban an index, inline a dedup target) and re-encode; both
    /// adjustments shrink a finite set, so the retries terminate too.
    fn layout_and_render(&self) -> Result<String, Overrun> {
        let n = self.pieces.len();
        let mut lens: Vec<usize> = self
            .pieces
            .iter()
            .map(|piece| match piece {
                Piece::Text(s) => s.len(),
                Piece::Len { .. } => 0,
                Piece::Ptr { .. } => 1,
                Piece::Entry { .. } => 1,
                Piece::Width { .. } => 1,
            })
            .collect();
        let mut widths = vec![1usize; self.tables.len()];
        let mut pos = vec![0usize; n + 1];
        loop {
            for i in 0..n {
                pos[i + 1] = pos[i] + lens[i];
            }
            let mut changed = false;
            for (i, piece) in self.pieces.iter().enumerate() {
                match piece {
                    Piece::Text(_) | Piece::Width { .. } => {}
                    Piece::Len { from, to } => {
                        let need = digit_len((pos[*to] - pos[*from]) as u64);
                        if need > lens[i] {
                            lens[i] = need;
                            changed = true;
                        }
                    }
                    Piece::Ptr { target, .. } => {
                        let offset = pos[self.literal_at[*target]] - pos[i + 1];
                        let need = digit_len(offset as u64) + 1;
                        if need > lens[i] {
                            lens[i] = need;
                            changed = true;
                        }
                    }
                    Piece::Entry { base, at, table } => {
                        let need = digit_len((pos[*at] - pos[*base]) as u64).max(1);
                        if need > widths[*table] {
                            if need > MAX_ENTRY_WIDTH {
                                return Err(Overrun::Index(self.tables[*table].owner));
                            }
                            widths[*table] = need;
                            changed = true;
                        }
                    }
                }
            }
            for (i, piece) in self.pieces.iter().enumerate() {
                if let Piece::Entry { table, .. } = piece {
                    if widths[*table] != lens[i] {
                        lens[i] = widths[*table];
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // Audit realized pointer widths: a target is only worth keeping in
        // the candidate set if at least one of its pointers is no longer
        // than the bytes it stands in for.
        let mut amortized: FxHashMap<Id, bool> = FxHashMap::default();
        for (i, piece) in self.pieces.iter().enumerate() {
            if let Piece::Ptr { target, at_skip } = piece {
                let node = &self.nodes[*target];
                let inline = node.plain.len()
                    + if *at_skip && node.key.is_container() {
                        digit_len(node.body_len as u64)
                    } else {
                        0
                    };
                *amortized.entry(*target).or_insert(false) |= lens[i] <= inline;
            }
        }
        if let Some((&target, _)) = amortized.iter().find(|&(_, &keep)| !keep) {
            return Err(Overrun::Pointer(target));
        }

        let mut out = String::with_capacity(pos[n]);
        for (i, piece) in self.pieces.iter().enumerate() {
            match piece {
                Piece::Text(s) => out.push_str(s),
                Piece::Len { from, to } => push_digits(&mut out, (pos[*to] - pos[*from]) as u64),
                Piece::Ptr { target, .. } => {
                    push_digits(&mut out, (pos[self.literal_at[*target]] - pos[i + 1]) as u64);
                    out.push('^');
                }
                Piece::Entry { base, at, table } => {
                    push_fixed_digits(&mut out, (pos[*at] - pos[*base]) as u64, widths[*table]);
                }
                Piece::Width { table } => out.push(ALPHABET[widths[*table] - 1] as char),
            }
        }
        Ok(out)
    }
}

/// Plain rendering of an index body: width digit, fixed-width entries,
/// elements. Returns the body length, or `None` when the offsets outgrow
/// the widest entry field (the caller falls back to the unindexed form).
fn render_plain_index(
    opener: u8,
    offsets: &[usize],
    elements: &[&str],
    out: &mut String,
) -> Option<usize> {
    let width = offsets
        .iter()
        .map(|&o| digit_len(o as u64))
        .max()
        .unwrap_or(0)
        .max(1);
    if width > MAX_ENTRY_WIDTH {
        return None;
    }
    out.push('#');
    push_digits(out, offsets.len() as u64);
    out.push(opener as char);
    let body_start = out.len();
    out.push(ALPHABET[width - 1] as char);
    for &offset in offsets {
        push_fixed_digits(out, offset as u64, width);
    }
    for element in elements {
        out.push_str(element);
    }
    Some(out.len() - body_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, get, Key};

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    fn arr(values: Vec<Value>) -> Value {
        Value::Array(values)
    }

    #[test]
    fn scalars_encode_canonically() {
        assert_eq!(encode(&int(0)).unwrap(), "+");
        assert_eq!(encode(&int(-1)).unwrap(), "1+");
        assert_eq!(encode(&int(1)).unwrap(), "2+");
        assert_eq!(encode(&int(42)).unwrap(), "1k+");
        assert_eq!(
            encode(&Value::Decimal { power: -1, significand: 25 }).unwrap(),
            "1*O+"
        );
        assert_eq!(encode(&Value::RawString("hello".into())).unwrap(), "5,hello");
        assert_eq!(encode(&Value::RawString(String::new())).unwrap(), ",");
        assert_eq!(encode(&Value::BareString("red".into())).unwrap(), "red:");
        assert_eq!(encode(&Value::Variable("x".into())).unwrap(), "x$");
        assert_eq!(encode(&Value::Opcode(3)).unwrap(), "3%");
        assert_eq!(encode(&Value::Reference(0)).unwrap(), "@");
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert_eq!(
            encode(&Value::BareString("has space".into())),
            Err(EncodeError::InvalidBareString("has space".into()))
        );
        assert_eq!(
            encode(&Value::Variable("ñ".into())),
            Err(EncodeError::InvalidVariable("ñ".into()))
        );
        assert_eq!(encode(&Value::Alt(vec![])), Err(EncodeError::EmptyAlternatives));
    }

    #[test]
    fn containers_take_prefixes_only_at_skip_positions() {
        assert_eq!(encode(&arr(vec![int(1), int(2), int(3)])).unwrap(), "[2+4+6+]");
        assert_eq!(encode(&arr(vec![arr(vec![int(1)])])).unwrap(), "[2[2+]]");
        assert_eq!(encode(&Value::Call(vec![])).unwrap(), "()");
        assert_eq!(
            encode(&Value::When {
                cond: Box::new(Value::Variable("x".into())),
                then: Box::new(arr(vec![int(1)])),
                otherwise: None,
            })
            .unwrap(),
            "?(x$2[2+])"
        );
        assert_eq!(
            encode(&Value::Set {
                place: Box::new(Value::Variable("x".into())),
                value: Box::new(int(1)),
            })
            .unwrap(),
            "=x$2+"
        );
        assert_eq!(
            encode(&Value::Delete { place: Box::new(Value::Variable("x".into())) }).unwrap(),
            "~x$"
        );
        assert_eq!(
            encode(&Value::Alt(vec![int(1), arr(vec![int(2)])])).unwrap(),
            "|(2+2[4+])"
        );
    }

    #[test]
    fn repeated_values_become_pointers() {
        assert_eq!(encode(&arr(vec![int(1), int(1)])).unwrap(), "[^2+]");
        assert_eq!(encode(&arr(vec![arr(vec![]), arr(vec![])])).unwrap(), "[^[]]");
        let obj = Value::Object(vec![(Value::BareString("a".into()), int(1))]);
        assert_eq!(encode(&arr(vec![obj.clone(), obj])).unwrap(), "[^4{a:2+}]");
    }

    #[test]
    fn dedup_skips_values_below_the_size_threshold() {
        // a one-byte value never amortizes a one-byte pointer
        assert_eq!(encode(&arr(vec![int(0), int(0)])).unwrap(), "[++]");
        let options = EncodeOptions { dedup: false, ..Default::default() };
        assert_eq!(encode_with(&arr(vec![int(1), int(1)]), &options).unwrap(), "[2+2+]");
    }

    #[test]
    fn small_containers_stay_unindexed() {
        let value = Value::Object(vec![
            (Value::BareString("size".into()), int(42)),
            (Value::BareString("color".into()), Value::RawString("red".into())),
        ]);
        assert_eq!(encode(&value).unwrap(), "{size:1k+color:3,red}");
    }

    #[test]
    fn indexed_object_entries_are_sorted_by_key_content() {
        let value = Value::Object(vec![
            (Value::BareString("size".into()), int(42)),
            (Value::BareString("color".into()), Value::RawString("red".into())),
        ]);
        let options = EncodeOptions { index_min_len: 2, ..Default::default() };
        let blob = encode_with(&value, &options).unwrap();
        assert_eq!(blob, "#2{080size:1k+color:3,red}");
        assert_eq!(get(&blob, &["size".into()]).unwrap(), int(42));
        assert_eq!(
            get(&blob, &["color".into()]).unwrap(),
            Value::RawString("red".into())
        );
    }

    #[test]
    fn prefix_keys_sort_before_their_extensions() {
        // "a" < "a0" on content; comparing encoded tokens would flip them
        // because ':' sorts after every digit.
        let value = Value::Object(vec![
            (Value::BareString("a".into()), int(1)),
            (Value::BareString("a0".into()), int(2)),
        ]);
        let options = EncodeOptions { index_min_len: 2, ..Default::default() };
        let blob = encode_with(&value, &options).unwrap();
        assert_eq!(blob, "#2{004a:2+a0:4+}");
        assert_eq!(get(&blob, &["a".into()]).unwrap(), int(1));
        assert_eq!(get(&blob, &["a0".into()]).unwrap(), int(2));
    }

    #[test]
    fn key_kinds_sharing_content_stay_distinguishable() {
        let value = Value::Object(vec![
            (Value::RawString("a".into()), int(1)),
            (Value::BareString("a".into()), int(2)),
        ]);
        let options = EncodeOptions { index_min_len: 2, ..Default::default() };
        let blob = encode_with(&value, &options).unwrap();
        assert_eq!(blob, "#2{0051,a2+a:4+}");
        // a name lookup matches the bare form only
        assert_eq!(get(&blob, &["a".into()]).unwrap(), int(2));
        assert_eq!(decode(&blob).unwrap(), value);
    }

    #[test]
    fn duplicate_keys_fall_back_to_a_plain_object() {
        let mut pairs: Vec<(Value, Value)> = (0..8)
            .map(|i| (Value::BareString(format!("k{i}")), int(i)))
            .collect();
        pairs.push((Value::BareString("k3".into()), int(99)));
        let value = Value::Object(pairs);
        let blob = encode(&value).unwrap();
        assert!(!blob.starts_with('#'), "{blob}");
        assert_eq!(get(&blob, &["k3".into()]).unwrap(), int(3));
        assert_eq!(decode(&blob).unwrap(), value);
    }

    #[test]
    fn pointers_that_outgrow_their_target_are_inlined() {
        // A hundred bytes of padding pushes the pointer offset to two
        // digits, which never amortizes a two-byte literal.
        let value = arr(vec![int(1), Value::RawString("x".repeat(100)), int(1)]);
        let blob = encode(&value).unwrap();
        assert!(!blob.contains('^'), "{blob}");
        assert_eq!(decode(&blob).unwrap(), value);
    }

    #[test]
    fn indexed_array_entries_are_element_offsets() {
        let value = arr(vec![int(10), int(20), int(30)]);
        let options = EncodeOptions { index_min_len: 3, ..Default::default() };
        let blob = encode_with(&value, &options).unwrap();
        assert_eq!(blob, "#3[0024k+E+Y+]");
        for i in 0..3 {
            assert_eq!(
                get(&blob, &[Key::Index(i)]).unwrap(),
                int(10 * (i as i64 + 1))
            );
        }
    }

    #[test]
    fn encoded_output_decodes_back() {
        let value = Value::Object(vec![
            (
                Value::BareString("rules".into()),
                arr(vec![
                    Value::When {
                        cond: Box::new(Value::Call(vec![
                            Value::Opcode(4),
                            Value::Variable("x".into()),
                        ])),
                        then: Box::new(Value::Set {
                            place: Box::new(Value::Variable("x".into())),
                            value: Box::new(Value::Decimal { power: -2, significand: 314 }),
                        }),
                        otherwise: Some(Box::new(Value::Delete {
                            place: Box::new(Value::Variable("x".into())),
                        })),
                    },
                    Value::All(vec![int(1), Value::RawString("done".into())]),
                ]),
            ),
            (Value::BareString("n".into()), int(-7)),
        ]);
        let blob = encode(&value).unwrap();
        assert_eq!(decode(&blob).unwrap(), value);
        // canonical form is a fixed point
        assert_eq!(encode(&decode(&blob).unwrap()).unwrap(), blob);
    }

    #[test]
    fn shared_subtrees_round_trip() {
        let shared = arr(vec![int(5), Value::RawString("shared".into())]);
        let value = arr(vec![shared.clone(), arr(vec![shared.clone()]), shared]);
        let blob = encode(&value).unwrap();
        assert_eq!(decode(&blob).unwrap(), value);
    }
}
