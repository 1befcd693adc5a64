//! Hierarchical node tree for node-based protocols (OPC UA address space).
//!
//! Each device gets the layout:
//!
//! ```text
//! Objects
//!   └─ Machines
//!        └─ {device name}
//!             ├─ {sensor name}   (variable)
//!             └─ ...
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    device::Device,
    sensor::{DataType, SensorDefinition, SensorId, SensorValue},
};

/// Index of a node inside a [`NodeTree`].
pub type NodeId = u32;

/// Name of the root folder.
pub const OBJECTS_FOLDER: &str = "Objects";

/// Name of the folder grouping all simulated machines.
pub const MACHINES_FOLDER: &str = "Machines";

/// Separator of browse path segments. Node names never contain it.
pub const PATH_SEPARATOR: char = '/';

/// Wire type of a variable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariantType {
    /// 32-bit float
    Float,
    /// 32-bit signed integer
    Int32,
    /// Boolean
    Boolean,
}

impl From<DataType> for VariantType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Float => Self::Float,
            DataType::Int => Self::Int32,
            DataType::Bool => Self::Boolean,
        }
    }
}

impl VariantType {
    /// Convert a value to what a variable of this type can hold.
    #[allow(clippy::cast_possible_truncation)]
    pub fn coerce(self, value: SensorValue) -> SensorValue {
        match self {
            Self::Boolean => match value {
                SensorValue::Bool(v) => SensorValue::Bool(v),
                other => SensorValue::Bool(other.as_f64() != 0.0),
            },
            Self::Int32 => {
                let raw = match value {
                    SensorValue::Int(v) => v,
                    other => other.as_f64() as i64,
                };
                SensorValue::Int(raw.clamp(i64::from(i32::MIN), i64::from(i32::MAX)))
            },
            Self::Float => SensorValue::Float(f64::from(value.as_f64() as f32)),
        }
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    /// Organizing folder
    Folder,
    /// Value-carrying variable
    Variable {
        /// Declared wire type
        variant: VariantType,
        /// Current value
        value: SensorValue,
        /// Whether clients may write the value
        writable: bool,
    },
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    /// Node index
    pub id: NodeId,
    /// Browse name
    pub name: String,
    /// Parent folder, `None` for the root
    pub parent: Option<NodeId>,
    /// Child nodes in insertion order
    pub children: Vec<NodeId>,
    /// Folder or variable
    pub kind: NodeKind,
}

/// Address space of one simulated device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTree {
    namespace_uri: String,
    server_name: String,
    nodes: Vec<Node>,
}

impl NodeTree {
    /// Build the tree for a device, with one variable per sensor.
    ///
    /// Variables start at the sensor's initial value. Returns the tree and the
    /// node of each sensor.
    pub fn for_device(
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> (Self, BTreeMap<SensorId, NodeId>) {
        let mut tree = Self {
            namespace_uri: format!("urn:plc-simulator:{}", device.name),
            server_name: format!("PLC Simulator - {}", device.name),
            nodes: Vec::with_capacity(sensors.len() + 3),
        };

        let objects = tree.add(None, OBJECTS_FOLDER, NodeKind::Folder);
        let machines = tree.add(Some(objects), MACHINES_FOLDER, NodeKind::Folder);
        let machine = tree.add(Some(machines), &device.name, NodeKind::Folder);

        let mut variables = BTreeMap::new();
        for sensor in sensors {
            let variant = VariantType::from(sensor.data_type);
            let value = variant.coerce(SensorValue::Float(sensor.initial));
            let node = tree.add(
                Some(machine),
                &sensor.name,
                NodeKind::Variable { variant, value, writable: true },
            );
            variables.insert(sensor.id, node);
        }

        (tree, variables)
    }

    fn add(&mut self, parent: Option<NodeId>, name: &str, kind: NodeKind) -> NodeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { id, name: name.to_string(), parent, children: Vec::new(), kind });
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p as usize)) {
            parent.children.push(id);
        }
        id
    }

    /// Namespace registered for the device.
    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    /// Server name advertised for the device.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Look up a node by index.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    /// Slash-separated browse path of a node, e.g.
    /// `Objects/Machines/Press-01/Temp`.
    pub fn path(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.node(id);
        while let Some(node) = current {
            names.push(node.name.as_str());
            current = node.parent.and_then(|p| self.node(p));
        }
        if names.is_empty() {
            return None;
        }
        names.reverse();
        Some(names.join(&PATH_SEPARATOR.to_string()))
    }

    /// Resolve a slash-separated browse path from the root.
    pub fn browse(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split(PATH_SEPARATOR);
        let root_name = segments.next()?;
        let mut node = self.nodes.first().filter(|root| root.name == root_name)?;
        for segment in segments {
            node = node
                .children
                .iter()
                .filter_map(|child| self.node(*child))
                .find(|child| child.name == segment)?;
        }
        Some(node)
    }

    /// Current value of a variable.
    pub fn read(&self, id: NodeId) -> Option<SensorValue> {
        match self.node(id)?.kind {
            NodeKind::Variable { value, .. } => Some(value),
            NodeKind::Folder => None,
        }
    }

    /// Write a variable, coercing to its declared type.
    ///
    /// Returns `false` if `id` is not a variable.
    pub fn write(&mut self, id: NodeId, value: SensorValue) -> bool {
        match self.nodes.get_mut(id as usize).map(|node| &mut node.kind) {
            Some(NodeKind::Variable { variant, value: slot, .. }) => {
                *slot = variant.coerce(value);
                true
            },
            _ => false,
        }
    }
}
