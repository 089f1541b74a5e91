//! Per-primitive and per-vertex shading attributes, and the requests shaders make for them.

use crate::core;

use std::fmt;

/// Attributes with a meaning known to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeStandard {
    VertexNormal,
    FaceNormal,
    UV,
    Generated,
    PositionUndisplaced,
    MotionVertexPosition,
    MotionVertexNormal,
    CurveIntercept,
}

impl AttributeStandard {
    pub fn name(&self) -> &'static str {
        match *self {
            AttributeStandard::VertexNormal => "N",
            AttributeStandard::FaceNormal => "Ng",
            AttributeStandard::UV => "uv",
            AttributeStandard::Generated => "generated",
            AttributeStandard::PositionUndisplaced => "undisplaced",
            AttributeStandard::MotionVertexPosition => "motion_P",
            AttributeStandard::MotionVertexNormal => "motion_N",
            AttributeStandard::CurveIntercept => "curve_intercept",
        }
    }

    /// Element a standard attribute is stored on, for triangle or curve attribute sets.
    pub fn element(&self, curves: bool) -> AttributeElement {
        match (*self, curves) {
            (AttributeStandard::VertexNormal, _) => AttributeElement::Vertex,
            (AttributeStandard::FaceNormal, _) => AttributeElement::Face,
            (AttributeStandard::UV, false) => AttributeElement::Corner,
            (AttributeStandard::UV, true) => AttributeElement::Curve,
            (AttributeStandard::Generated, false) => AttributeElement::Vertex,
            (AttributeStandard::Generated, true) => AttributeElement::Curve,
            (AttributeStandard::PositionUndisplaced, _) => AttributeElement::Vertex,
            (AttributeStandard::MotionVertexPosition, false) => AttributeElement::VertexMotion,
            (AttributeStandard::MotionVertexPosition, true) => AttributeElement::CurveKeyMotion,
            (AttributeStandard::MotionVertexNormal, _) => AttributeElement::VertexMotion,
            (AttributeStandard::CurveIntercept, _) => AttributeElement::CurveKey,
        }
    }

    pub fn data_type(&self) -> AttributeType {
        match *self {
            AttributeStandard::UV => AttributeType::Float2,
            AttributeStandard::CurveIntercept => AttributeType::Float,
            _ => AttributeType::Float3,
        }
    }
}

/// What an attribute's values are attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeElement {
    Mesh,
    Face,
    Vertex,
    VertexMotion,
    Corner,
    Curve,
    CurveKey,
    CurveKeyMotion,
}

impl AttributeElement {
    pub fn device_code(&self) -> u32 {
        match *self {
            AttributeElement::Mesh => 1,
            AttributeElement::Face => 2,
            AttributeElement::Vertex => 3,
            AttributeElement::VertexMotion => 4,
            AttributeElement::Corner => 5,
            AttributeElement::Curve => 6,
            AttributeElement::CurveKey => 7,
            AttributeElement::CurveKeyMotion => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Float,
    Float2,
    Float3,
}

impl AttributeType {
    pub fn device_code(&self) -> u32 {
        match *self {
            AttributeType::Float => 0,
            AttributeType::Float2 => 1,
            AttributeType::Float3 => 2,
        }
    }
}

/// Identifies an attribute either by standard meaning or by user name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKey {
    Standard(AttributeStandard),
    Name(String),
}

impl AttributeKey {
    pub fn named(name: &str) -> AttributeKey {
        AttributeKey::Name(name.to_string())
    }
}

impl From<AttributeStandard> for AttributeKey {
    fn from(std: AttributeStandard) -> AttributeKey {
        AttributeKey::Standard(std)
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AttributeKey::Standard(std) => write!(f, "{}", std.name()),
            AttributeKey::Name(ref name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeData {
    Float(Vec<f32>),
    Float2(Vec<core::Vec2>),
    Float3(Vec<core::Vec>),
}

impl AttributeData {
    fn new(data_type: AttributeType) -> AttributeData {
        match data_type {
            AttributeType::Float => AttributeData::Float(vec![]),
            AttributeType::Float2 => AttributeData::Float2(vec![]),
            AttributeType::Float3 => AttributeData::Float3(vec![]),
        }
    }

    pub fn data_type(&self) -> AttributeType {
        match *self {
            AttributeData::Float(_) => AttributeType::Float,
            AttributeData::Float2(_) => AttributeType::Float2,
            AttributeData::Float3(_) => AttributeType::Float3,
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            AttributeData::Float(ref v) => v.len(),
            AttributeData::Float2(ref v) => v.len(),
            AttributeData::Float3(ref v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resize(&mut self, n: usize) {
        match *self {
            AttributeData::Float(ref mut v) => v.resize(n, 0.0),
            AttributeData::Float2(ref mut v) => v.resize(n, core::Vec2::zero()),
            AttributeData::Float3(ref mut v) => v.resize(n, core::Vec::zero()),
        }
    }

    fn reserve(&mut self, n: usize) {
        match *self {
            AttributeData::Float(ref mut v) => v.reserve(n),
            AttributeData::Float2(ref mut v) => v.reserve(n),
            AttributeData::Float3(ref mut v) => v.reserve(n),
        }
    }

    fn insert_default(&mut self, at: usize) {
        match *self {
            AttributeData::Float(ref mut v) => v.insert(at, 0.0),
            AttributeData::Float2(ref mut v) => v.insert(at, core::Vec2::zero()),
            AttributeData::Float3(ref mut v) => v.insert(at, core::Vec::zero()),
        }
    }

    /// Inserts a copy of the value at `from` at position `at`.
    fn duplicate_into(&mut self, from: usize, at: usize) {
        match *self {
            AttributeData::Float(ref mut v) => { let x = v[from]; v.insert(at, x); },
            AttributeData::Float2(ref mut v) => { let x = v[from]; v.insert(at, x); },
            AttributeData::Float3(ref mut v) => { let x = v[from]; v.insert(at, x); },
        }
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match *self {
            AttributeData::Float(ref v) => Some(v),
            _ => None
        }
    }

    pub fn as_float2(&self) -> Option<&[core::Vec2]> {
        match *self {
            AttributeData::Float2(ref v) => Some(v),
            _ => None
        }
    }

    pub fn as_float3(&self) -> Option<&[core::Vec]> {
        match *self {
            AttributeData::Float3(ref v) => Some(v),
            _ => None
        }
    }

    pub fn as_float3_mut(&mut self) -> Option<&mut Vec<core::Vec>> {
        match *self {
            AttributeData::Float3(ref mut v) => Some(v),
            _ => None
        }
    }
}

/// Element counts of the geometry an attribute set belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ElementCounts {
    pub verts: usize,
    pub triangles: usize,
    pub curves: usize,
    pub curve_keys: usize,
    pub motion_steps: usize,
}

impl ElementCounts {
    pub fn element_size(&self, element: AttributeElement) -> usize {
        let motion_sets = if self.motion_steps > 1 { self.motion_steps - 1 } else { 0 };
        match element {
            AttributeElement::Mesh => 1,
            AttributeElement::Face => self.triangles,
            AttributeElement::Vertex => self.verts,
            AttributeElement::VertexMotion => self.verts * motion_sets,
            AttributeElement::Corner => self.triangles * 3,
            AttributeElement::Curve => self.curves,
            AttributeElement::CurveKey => self.curve_keys,
            AttributeElement::CurveKeyMotion => self.curve_keys * motion_sets,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub key: AttributeKey,
    pub element: AttributeElement,
    pub data: AttributeData,
}

impl Attribute {
    pub fn name(&self) -> String {
        self.key.to_string()
    }

    pub fn standard(&self) -> Option<AttributeStandard> {
        match self.key {
            AttributeKey::Standard(std) => Some(std),
            AttributeKey::Name(_) => None
        }
    }

    pub fn data_type(&self) -> AttributeType {
        self.data.data_type()
    }
}

/// Attributes of one primitive family (triangles or curves) of a mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeSet {
    attributes: Vec<Attribute>,
    curves: bool,
}

impl AttributeSet {
    pub fn for_triangles() -> AttributeSet {
        AttributeSet {attributes: vec![], curves: false}
    }

    pub fn for_curves() -> AttributeSet {
        AttributeSet {attributes: vec![], curves: true}
    }

    /// Adds (or returns the existing) standard attribute, sized to `counts`.
    pub fn add_standard(&mut self, std: AttributeStandard, counts: &ElementCounts)
        -> &mut Attribute
    {
        let element = std.element(self.curves);
        self.add(AttributeKey::Standard(std), std.data_type(), element, counts)
    }

    pub fn add(&mut self, key: AttributeKey, data_type: AttributeType, element: AttributeElement,
        counts: &ElementCounts) -> &mut Attribute
    {
        let index = match self.attributes.iter().position(|a| a.key == key) {
            Some(index) => index,
            None => {
                let mut data = AttributeData::new(data_type);
                data.resize(counts.element_size(element));
                self.attributes.push(Attribute {key: key, element: element, data: data});
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[index]
    }

    pub fn find(&self, key: &AttributeKey) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == *key)
    }

    pub fn find_mut(&mut self, key: &AttributeKey) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.key == *key)
    }

    pub fn find_standard(&self, std: AttributeStandard) -> Option<&Attribute> {
        self.find(&AttributeKey::Standard(std))
    }

    pub fn find_standard_mut(&mut self, std: AttributeStandard) -> Option<&mut Attribute> {
        self.find_mut(&AttributeKey::Standard(std))
    }

    pub fn remove(&mut self, key: &AttributeKey) {
        self.attributes.retain(|a| a.key != *key);
    }

    pub fn remove_standard(&mut self, std: AttributeStandard) {
        self.remove(&AttributeKey::Standard(std));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
    }

    /// Resizes every attribute to the element counts of its geometry.
    pub fn resize(&mut self, counts: &ElementCounts) {
        for attr in &mut self.attributes {
            attr.data.resize(counts.element_size(attr.element));
        }
    }

    pub fn reserve(&mut self, counts: &ElementCounts) {
        for attr in &mut self.attributes {
            attr.data.reserve(counts.element_size(attr.element));
        }
    }

    /// Appends a default value for a new vertex to every vertex attribute. `counts` are the
    /// element counts before the vertex was added.
    pub fn add_vertex(&mut self, counts: &ElementCounts) {
        let num_verts = counts.verts;
        for attr in &mut self.attributes {
            match attr.element {
                AttributeElement::Vertex => {
                    attr.data.resize(num_verts + 1);
                },
                AttributeElement::VertexMotion => {
                    attr.data.resize(counts.element_size(attr.element));
                    let steps = attr.data.len() / num_verts.max(1);
                    for step in (0..steps).rev() {
                        attr.data.insert_default((step + 1) * num_verts);
                    }
                },
                _ => {}
            }
        }
    }

    /// Appends a copy of vertex `vertex`'s values to every vertex attribute. `counts` are the
    /// element counts before the split. Motion attributes get the copy at the end of each step.
    pub fn split_vertex(&mut self, vertex: usize, counts: &ElementCounts) {
        let num_verts = counts.verts;
        for attr in &mut self.attributes {
            match attr.element {
                AttributeElement::Vertex => {
                    // Attributes filled by hand may lag behind the vertex count.
                    attr.data.resize(num_verts);
                    attr.data.duplicate_into(vertex, num_verts);
                },
                AttributeElement::VertexMotion => {
                    attr.data.resize(counts.element_size(attr.element));
                    let steps = attr.data.len() / num_verts.max(1);
                    // Walk steps back to front so earlier insertions don't shift later ones.
                    for step in (0..steps).rev() {
                        let from = step * num_verts + vertex;
                        attr.data.duplicate_into(from, (step + 1) * num_verts);
                    }
                },
                _ => {}
            }
        }
    }
}

/// A shader's request for an attribute, resolved to device locations during packing.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeRequest {
    pub key: AttributeKey,
    pub triangle_desc: AttributeDescriptor,
    pub curve_desc: AttributeDescriptor,
}

impl AttributeRequest {
    pub fn new(key: AttributeKey) -> AttributeRequest {
        AttributeRequest {
            key: key,
            triangle_desc: AttributeDescriptor::missing(),
            curve_desc: AttributeDescriptor::missing()
        }
    }
}

/// Where packed attribute values live on the device. A missing attribute has no element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttributeDescriptor {
    pub element: Option<AttributeElement>,
    pub data_type: AttributeType,
    pub offset: usize,
}

impl AttributeDescriptor {
    pub fn missing() -> AttributeDescriptor {
        AttributeDescriptor {element: None, data_type: AttributeType::Float, offset: 0}
    }

    pub fn is_missing(&self) -> bool {
        self.element.is_none()
    }
}

/// An ordered, duplicate-free set of attribute requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeRequestSet {
    pub requests: Vec<AttributeRequest>,
}

impl AttributeRequestSet {
    pub fn new() -> AttributeRequestSet {
        AttributeRequestSet {requests: vec![]}
    }

    pub fn add(&mut self, key: AttributeKey) {
        if !self.find(&key) {
            self.requests.push(AttributeRequest::new(key));
        }
    }

    pub fn add_standard(&mut self, std: AttributeStandard) {
        self.add(AttributeKey::Standard(std));
    }

    pub fn add_set(&mut self, other: &AttributeRequestSet) {
        for req in &other.requests {
            self.add(req.key.clone());
        }
    }

    pub fn find(&self, key: &AttributeKey) -> bool {
        self.requests.iter().any(|r| r.key == *key)
    }

    pub fn position(&self, key: &AttributeKey) -> Option<usize> {
        self.requests.iter().position(|r| r.key == *key)
    }

    pub fn get_mut(&mut self, key: &AttributeKey) -> Option<&mut AttributeRequest> {
        self.requests.iter_mut().find(|r| r.key == *key)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// True if the two sets request different attributes.
    pub fn modified(&self, other: &AttributeRequestSet) -> bool {
        self.requests.len() != other.requests.len()
            || self.requests.iter().any(|r| !other.find(&r.key))
    }
}
