use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Read capabilities may run concurrently on one app; writes are exclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn is_read(self) -> bool {
        matches!(self, AccessKind::Read)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    fn schema_name(self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array => Some("array"),
            ParamType::Object => Some("object"),
            ParamType::Any => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Name, access classification and typed parameter list of one capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub access: AccessKind,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl CapabilitySpec {
    pub fn read(name: impl Into<String>) -> Self {
        Self::new(name, AccessKind::Read)
    }

    pub fn write(name: impl Into<String>) -> Self {
        Self::new(name, AccessKind::Write)
    }

    pub fn new(name: impl Into<String>, access: AccessKind) -> Self {
        Self {
            name: name.into(),
            access,
            params: Vec::new(),
            description: String::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parameter list rendered as a JSON-Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut prop = Map::new();
            if let Some(ty) = param.ty.schema_name() {
                prop.insert("type".into(), Value::String(ty.into()));
            }
            if !param.description.is_empty() {
                prop.insert(
                    "description".into(),
                    Value::String(param.description.clone()),
                );
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "name": self.name,
            "access": self.access,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lists_required_params() {
        let spec = CapabilitySpec::write("send_email")
            .param(ParamSpec::required("to", ParamType::String))
            .param(ParamSpec::optional("cc", ParamType::Array).describe("copy list"));
        let schema = spec.to_json_schema();
        assert_eq!(schema["access"], "write");
        assert_eq!(schema["parameters"]["required"], json!(["to"]));
        assert_eq!(
            schema["parameters"]["properties"]["cc"]["description"],
            "copy list"
        );
    }

    #[test]
    fn integer_rejects_floats() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Number.accepts(&json!(3.5)));
    }
}
