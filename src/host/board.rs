//! A small in-memory construction board: points, segments, texts and sliders that scripts
//! can create, look up by name and modify.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use super::{Attributes, CreatorRegistry, HostError, HostObject, HostRef, NameResolver, SessionId};
use crate::{ast::Axis, tree_walk_interpreter::RuntimeValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ElementKind {
    Point,
    Segment,
    Text,
    Slider,
}

#[derive(Debug)]
pub struct BoardElement {
    id: String,
    kind: ElementKind,
    name: RefCell<String>,
    coords: Cell<[f64; 2]>,
    endpoints: Vec<HostRef>,
    text: RefCell<String>,
    label: Option<HostRef>,
    /// Slider range and current value.
    bounds: [f64; 2],
    value: Cell<f64>,
    attributes: RefCell<Attributes>,
    removed: Cell<bool>,
}

fn coords_of(value: &RuntimeValue) -> Option<[f64; 2]> {
    match value {
        RuntimeValue::Host(host) => Some([host.coordinate(Axis::X)?, host.coordinate(Axis::Y)?]),
        RuntimeValue::Array(array) => Some([array.get(0)?.as_number()?, array.get(1)?.as_number()?]),
        _ => None,
    }
}

impl BoardElement {
    fn new(id: String, kind: ElementKind, name: String) -> Self {
        Self {
            id,
            kind,
            name: RefCell::new(name),
            coords: Cell::new([0.0, 0.0]),
            endpoints: vec![],
            text: RefCell::new(String::new()),
            label: None,
            bounds: [0.0, 0.0],
            value: Cell::new(0.0),
            attributes: RefCell::new(Attributes::new()),
            removed: Cell::new(false),
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    fn has_position(&self) -> bool {
        self.kind != ElementKind::Segment
    }

    fn length(&self) -> Result<f64, HostError> {
        match self.endpoints.as_slice() {
            [a, b] => {
                let a = coords_of(&a.clone().into()).unwrap_or([f64::NAN; 2]);
                let b = coords_of(&b.clone().into()).unwrap_or([f64::NAN; 2]);
                Ok((a[0] - b[0]).hypot(a[1] - b[1]))
            }
            _ => Err(HostError::new(format!("{} has no length", self.name()))),
        }
    }

    fn set_value(&self, value: &RuntimeValue) -> Result<(), HostError> {
        let number = value
            .as_number()
            .ok_or_else(|| HostError::new(format!("value of {} must be a number", self.name())))?;
        let [min, max] = self.bounds;
        self.value.set(number.max(min).min(max));
        Ok(())
    }

    fn set_coordinate(&self, index: usize, value: &RuntimeValue) -> Result<(), HostError> {
        let number = value
            .as_number()
            .ok_or_else(|| HostError::new(format!("coordinate of {} must be a number", self.name())))?;
        let mut coords = self.coords.get();
        coords[index] = number;
        self.coords.set(coords);
        Ok(())
    }
}

impl HostObject for BoardElement {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.borrow().clone()
    }

    fn sub_object(&self, name: &str) -> Option<RuntimeValue> {
        match name {
            "label" => self.label.clone().map(RuntimeValue::Host),
            _ => None,
        }
    }

    fn method_alias(&self, name: &str) -> Option<String> {
        let method = match (self.kind, name) {
            (ElementKind::Point, "X") | (ElementKind::Text, "X") => "X",
            (ElementKind::Point, "Y") | (ElementKind::Text, "Y") => "Y",
            (ElementKind::Point, "Dist") | (ElementKind::Point, "distance") => "Dist",
            (ElementKind::Point, "moveTo") | (ElementKind::Point, "setPosition") => "moveTo",
            (ElementKind::Segment, "L") | (ElementKind::Segment, "length") => "L",
            (ElementKind::Text, "setText") => "setText",
            (ElementKind::Slider, "Value") | (ElementKind::Slider, "V") => "Value",
            (ElementKind::Slider, "setValue") => "setValue",
            _ => return None,
        };
        Some(method.to_string())
    }

    fn call_method(&self, method: &str, args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        let [x, y] = self.coords.get();
        match method {
            "X" => Ok(x.into()),
            "Y" => Ok(y.into()),
            "Dist" => {
                let [ox, oy] = args
                    .first()
                    .and_then(coords_of)
                    .ok_or_else(|| HostError::new("Dist needs a point or a coordinate pair"))?;
                Ok((x - ox).hypot(y - oy).into())
            }
            "moveTo" => {
                let target = args
                    .first()
                    .and_then(coords_of)
                    .ok_or_else(|| HostError::new("moveTo needs a coordinate pair"))?;
                self.coords.set(target);
                Ok(RuntimeValue::Undefined)
            }
            "L" => self.length().map(RuntimeValue::from),
            "Value" if self.kind == ElementKind::Slider => Ok(self.value.get().into()),
            "setValue" if self.kind == ElementKind::Slider => {
                self.set_value(args.first().unwrap_or(&RuntimeValue::Undefined))?;
                Ok(RuntimeValue::Undefined)
            }
            "setText" => {
                let content = args.first().map(|arg| arg.to_string()).unwrap_or_default();
                *self.text.borrow_mut() = content;
                Ok(RuntimeValue::Undefined)
            }
            _ => Err(HostError::new(format!(
                "{} has no method {}",
                self.name(),
                method
            ))),
        }
    }

    fn attribute(&self, name: &str) -> Option<RuntimeValue> {
        match name {
            "id" => Some(self.id.as_str().into()),
            "name" => Some(self.name().into()),
            "type" => Some(self.kind.to_string().into()),
            "x" if self.has_position() => Some(self.coords.get()[0].into()),
            "y" if self.has_position() => Some(self.coords.get()[1].into()),
            "text" if self.kind == ElementKind::Text => Some(self.text.borrow().as_str().into()),
            "value" if self.kind == ElementKind::Slider => Some(self.value.get().into()),
            _ => self.attributes.borrow().get(name).cloned(),
        }
    }

    fn set_property(&self, name: &str, value: RuntimeValue) -> Result<(), HostError> {
        match name {
            "x" if self.has_position() => self.set_coordinate(0, &value),
            "y" if self.has_position() => self.set_coordinate(1, &value),
            "name" => {
                *self.name.borrow_mut() = value.to_string();
                Ok(())
            }
            "text" if self.kind == ElementKind::Text => {
                *self.text.borrow_mut() = value.to_string();
                Ok(())
            }
            "value" if self.kind == ElementKind::Slider => self.set_value(&value),
            _ => {
                self.attributes.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    fn is_read_only(&self, name: &str) -> bool {
        matches!(name, "id" | "type" | "label")
    }

    fn element(&self, index: usize) -> Option<RuntimeValue> {
        match index {
            0 | 1 if self.has_position() => Some(self.coords.get()[index].into()),
            _ => None,
        }
    }

    fn set_element(&self, index: usize, value: RuntimeValue) -> Result<(), HostError> {
        match index {
            0 | 1 if self.has_position() => self.set_coordinate(index, &value),
            _ => Err(HostError::new(format!(
                "{} has no element {}",
                self.name(),
                index
            ))),
        }
    }

    fn coordinate(&self, axis: Axis) -> Option<f64> {
        match self.has_position() {
            true => Some(self.coords.get()[axis.index()]),
            false => None,
        }
    }

    fn remove(&self) -> Result<(), HostError> {
        self.removed.set(true);
        Ok(())
    }
}

/// One board session. Its creators are `point`, `segment`, `text` and `slider`.
#[derive(Debug)]
pub struct Board {
    name: String,
    elements: RefCell<Vec<Rc<BoardElement>>>,
}

impl Board {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: RefCell::new(vec![]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Elements that have not been removed, in creation order.
    pub fn elements(&self) -> Vec<HostRef> {
        self.elements
            .borrow()
            .iter()
            .filter(|element| !element.is_removed())
            .map(|element| HostRef::new(element.clone()))
            .collect()
    }

    fn next_id(&self) -> String {
        format!("{}_el{}", self.name, self.elements.borrow().len() + 1)
    }

    fn add(&self, element: BoardElement, attributes: &Attributes) -> RuntimeValue {
        {
            let mut bag = element.attributes.borrow_mut();
            for (key, value) in attributes {
                if key != "name" {
                    bag.insert(key.to_lowercase(), value.clone());
                }
            }
        }
        let element = Rc::new(element);
        self.elements.borrow_mut().push(element.clone());
        RuntimeValue::Host(HostRef::new(element))
    }

    fn create_point(&self, parents: &[RuntimeValue], name: String) -> Result<BoardElement, HostError> {
        let coords = match parents {
            [x, y] => [x.as_number(), y.as_number()],
            [pair] => coords_of(pair).map_or([None, None], |[x, y]| [Some(x), Some(y)]),
            _ => [None, None],
        };
        let coords = match coords {
            [Some(x), Some(y)] => [x, y],
            _ => return Err(HostError::new("point needs two numeric parents")),
        };
        let id = self.next_id();
        let mut label = BoardElement::new(format!("{}_label", id), ElementKind::Text, format!("{}_label", name));
        *label.text.get_mut() = name.clone();
        label.coords.set(coords);

        let mut point = BoardElement::new(id, ElementKind::Point, name);
        point.coords.set(coords);
        point.label = Some(HostRef::new(Rc::new(label)));
        Ok(point)
    }

    fn create_segment(&self, parents: &[RuntimeValue], name: String) -> Result<BoardElement, HostError> {
        let endpoints = parents
            .iter()
            .map(|parent| match parent {
                RuntimeValue::Host(host) if host.coordinate(Axis::X).is_some() => Some(host.clone()),
                _ => None,
            })
            .collect::<Option<Vec<HostRef>>>()
            .filter(|endpoints| endpoints.len() == 2)
            .ok_or_else(|| HostError::new("segment needs two points as parents"))?;
        let mut segment = BoardElement::new(self.next_id(), ElementKind::Segment, name);
        segment.endpoints = endpoints;
        Ok(segment)
    }

    fn create_text(&self, parents: &[RuntimeValue], name: String) -> Result<BoardElement, HostError> {
        match parents {
            [x, y, content] => {
                let coords = match (x.as_number(), y.as_number()) {
                    (Some(x), Some(y)) => [x, y],
                    _ => return Err(HostError::new("text needs numeric coordinates")),
                };
                let mut text = BoardElement::new(self.next_id(), ElementKind::Text, name);
                text.coords.set(coords);
                *text.text.get_mut() = content.to_string();
                Ok(text)
            }
            _ => Err(HostError::new("text needs x, y and a content")),
        }
    }

    /// `slider([x1, y1], [x2, y2], [min, start, max])`. The slider sits at its first anchor.
    fn create_slider(&self, parents: &[RuntimeValue], name: String) -> Result<BoardElement, HostError> {
        let invalid = || HostError::new("slider needs two anchors and [min, start, max]");
        let (anchor, range) = match parents {
            [first, _, range] => (coords_of(first).ok_or_else(invalid)?, range),
            _ => return Err(invalid()),
        };
        let [min, start, max] = match range {
            RuntimeValue::Array(array) if array.len() == 3 => {
                let number = |index| array.get(index).and_then(|value| value.as_number());
                match (number(0), number(1), number(2)) {
                    (Some(min), Some(start), Some(max)) if min <= max => [min, start, max],
                    _ => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        };
        let mut slider = BoardElement::new(self.next_id(), ElementKind::Slider, name);
        slider.coords.set(anchor);
        slider.bounds = [min, max];
        slider.value.set(start.max(min).min(max));
        Ok(slider)
    }
}

impl CreatorRegistry for Board {
    fn has(&self, session: SessionId, name: &str) -> bool {
        session == 0 && matches!(name, "point" | "segment" | "text" | "slider")
    }

    fn invoke(
        &self,
        session: SessionId,
        name: &str,
        parents: &[RuntimeValue],
        attributes: &Attributes,
    ) -> Result<RuntimeValue, HostError> {
        if session != 0 {
            return Err(HostError::new(format!("unknown board session {}", session)));
        }
        let element_name = match attributes.get("name") {
            Some(RuntimeValue::String(name)) => name.to_string(),
            _ => self.next_id(),
        };
        let element = match name {
            "point" => self.create_point(parents, element_name)?,
            "segment" => self.create_segment(parents, element_name)?,
            "text" => self.create_text(parents, element_name)?,
            "slider" => self.create_slider(parents, element_name)?,
            _ => return Err(HostError::new(format!("no creator named {}", name))),
        };
        Ok(self.add(element, attributes))
    }

    fn select_session(&self, name: &str) -> Option<SessionId> {
        match name == self.name {
            true => Some(0),
            false => None,
        }
    }

    fn session_object(self: Rc<Self>, session: SessionId) -> Option<RuntimeValue> {
        match session {
            0 => Some(RuntimeValue::Host(HostRef::new(self))),
            _ => None,
        }
    }
}

/// The board itself, as scripts see it through `$board`.
impl HostObject for Board {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn method_alias(&self, name: &str) -> Option<String> {
        match name {
            "select" => Some(name.to_string()),
            _ => None,
        }
    }

    fn call_method(&self, method: &str, args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        match method {
            "select" => {
                let name = args.first().map(|arg| arg.to_string()).unwrap_or_default();
                Ok(self
                    .select_by_name_or_id(&name)
                    .unwrap_or(RuntimeValue::Undefined))
            }
            _ => Err(HostError::new(format!("{} has no method {}", self.name, method))),
        }
    }

    fn attribute(&self, name: &str) -> Option<RuntimeValue> {
        match name {
            "id" | "name" => Some(self.name.as_str().into()),
            "type" => Some("board".into()),
            "numobjects" => Some((self.elements().len() as f64).into()),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, _value: RuntimeValue) -> Result<(), HostError> {
        Err(HostError::new(format!("cannot set {} of board {}", name, self.name)))
    }

    fn is_read_only(&self, _name: &str) -> bool {
        true
    }
}

impl NameResolver for Board {
    fn select_by_name_or_id(&self, name: &str) -> Option<RuntimeValue> {
        self.elements
            .borrow()
            .iter()
            .rev()
            .filter(|element| !element.is_removed())
            .find(|element| element.id == name || *element.name.borrow() == name)
            .map(|element| RuntimeValue::Host(HostRef::new(element.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn named(name: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), name.into());
        attributes
    }

    #[test]
    fn points_are_found_by_name_and_id() -> Result<(), HostError> {
        let board = Board::new("board");
        let a = board.invoke(0, "point", &[1.0.into(), 2.0.into()], &named("A"))?;
        assert_eq!(a.to_string(), "A");
        assert_eq!(board.select_by_name_or_id("A"), Some(a.clone()));
        assert_eq!(board.select_by_name_or_id("board_el1"), Some(a));
        assert_eq!(board.select_by_name_or_id("B"), None);
        Ok(())
    }

    #[test]
    fn segment_length_follows_its_points() -> Result<(), HostError> {
        let board = Board::new("board");
        let a = board.invoke(0, "point", &[0.0.into(), 0.0.into()], &named("A"))?;
        let b = board.invoke(0, "point", &[3.0.into(), 4.0.into()], &named("B"))?;
        let s = board.invoke(0, "segment", &[a.clone(), b], &named("s"))?;
        let segment = s.as_host().cloned().ok_or_else(|| HostError::new("not a host object"))?;
        assert_eq!(segment.call_method("L", &[])?, RuntimeValue::Number(5.0));

        let point = a.as_host().cloned().ok_or_else(|| HostError::new("not a host object"))?;
        point.set_property("x", (-3.0).into())?;
        assert_eq!(segment.call_method("L", &[])?, RuntimeValue::Number(7.211102550927978));
        Ok(())
    }

    #[test]
    fn bad_parents_are_reported() {
        let board = Board::new("board");
        let error = board.invoke(0, "segment", &[1.0.into()], &Attributes::new());
        assert_eq!(error, Err(HostError::new("segment needs two points as parents")));
        assert!(board.elements().is_empty());
    }

    #[test]
    fn sliders_clamp_their_value() -> Result<(), HostError> {
        let board = Board::new("board");
        let numbers = |values: &[f64]| {
            RuntimeValue::from(values.iter().copied().map(RuntimeValue::from).collect::<Vec<_>>())
        };
        let parents = [numbers(&[1.0, 1.0]), numbers(&[4.0, 1.0]), numbers(&[0.0, 3.0, 5.0])];
        let s = board.invoke(0, "slider", &parents, &named("s"))?;
        let slider = s.as_host().cloned().ok_or_else(|| HostError::new("not a host object"))?;
        assert_eq!(slider.method_alias("V"), Some("Value".to_string()));
        assert_eq!(slider.call_method("Value", &[])?, RuntimeValue::Number(3.0));
        slider.call_method("setValue", &[9.0.into()])?;
        assert_eq!(slider.attribute("value"), Some(RuntimeValue::Number(5.0)));
        assert_eq!(slider.coordinate(Axis::X), Some(1.0));

        let error = board.invoke(0, "slider", &[1.0.into()], &Attributes::new());
        assert_eq!(error, Err(HostError::new("slider needs two anchors and [min, start, max]")));
        Ok(())
    }

    #[test]
    fn the_board_is_a_host_object() -> Result<(), HostError> {
        let board = Rc::new(Board::new("main"));
        board.invoke(0, "point", &[1.0.into(), 2.0.into()], &named("A"))?;
        let object = board.clone().session_object(0).and_then(|value| value.as_host().cloned());
        let object = object.ok_or_else(|| HostError::new("no board object"))?;
        assert_eq!(object.name(), "main");
        assert_eq!(object.attribute("numobjects"), Some(RuntimeValue::Number(1.0)));
        assert_eq!(object.call_method("select", &["A".into()])?.to_string(), "A");
        assert!(object.is_read_only("name"));
        assert!(board.session_object(1).is_none());
        Ok(())
    }

    #[test]
    fn removed_elements_disappear() -> Result<(), HostError> {
        let board = Board::new("board");
        let a = board.invoke(0, "point", &[1.0.into(), 1.0.into()], &named("A"))?;
        a.as_host().map(|host| host.remove()).transpose()?;
        assert_eq!(board.select_by_name_or_id("A"), None);
        assert!(board.elements().is_empty());
        Ok(())
    }
}
