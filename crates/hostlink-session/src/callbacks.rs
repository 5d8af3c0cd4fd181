//! Callbacks the host can invoke by name.
//!
//! A callback is announced to the host with its parameter shape, so the host
//! knows how to marshal arguments into a public call. Inbound arguments are
//! decoded in declared order: values are 4 bytes, strings are NUL-terminated,
//! and arrays carry as many 4-byte cells as an earlier value parameter says.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bytes::{BufMut, BytesMut};
use hostlink_frame::{put_string, PayloadReader};

use crate::error::{Result, SessionError};

const ARG_TERMINATOR: u8 = 0x00;
const ARG_VALUE: u8 = 0x01;
const ARG_ARRAY: u8 = 0x02;
const ARG_STRING: u8 = 0x03;

/// A 32-bit value returned from a callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl Value {
    /// Wire form: 4 bytes little-endian, booleans as 1 or 0.
    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Value::Int(v) => v.to_le_bytes(),
            Value::Float(v) => v.to_le_bytes(),
            Value::Bool(v) => i32::from(v).to_le_bytes(),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Declared return type of a callback.
///
/// Only [`Void`](ReturnType::Void) and the value types can be registered;
/// the host has no way to receive strings or arrays back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Int,
    Float,
    Bool,
    String,
    Array,
}

impl ReturnType {
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            ReturnType::Void | ReturnType::Int | ReturnType::Float | ReturnType::Bool
        )
    }
}

/// How one callback parameter is laid out in a public call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterShape {
    /// A single 4-byte cell.
    Value,
    /// A NUL-terminated string.
    String,
    /// A run of 4-byte cells. `length_param` is the index of an earlier
    /// value parameter holding the cell count.
    Array { length_param: Option<usize> },
}

impl ParameterShape {
    /// An array whose length is carried by parameter `length_param`.
    pub fn array(length_param: usize) -> Self {
        ParameterShape::Array {
            length_param: Some(length_param),
        }
    }

    fn encode(self, dst: &mut BytesMut) {
        match self {
            ParameterShape::Value => dst.put_u8(ARG_VALUE),
            ParameterShape::String => dst.put_u8(ARG_STRING),
            ParameterShape::Array { length_param } => {
                dst.put_u8(ARG_ARRAY);
                dst.put_u32_le(length_param.unwrap_or_default() as u32);
            }
        }
    }
}

/// Return type plus ordered parameter shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub returns: ReturnType,
    pub params: Vec<ParameterShape>,
}

impl Signature {
    pub fn new(returns: ReturnType) -> Self {
        Self {
            returns,
            params: Vec::new(),
        }
    }

    pub fn value(mut self) -> Self {
        self.params.push(ParameterShape::Value);
        self
    }

    pub fn string(mut self) -> Self {
        self.params.push(ParameterShape::String);
        self
    }

    pub fn array(mut self, length_param: usize) -> Self {
        self.params.push(ParameterShape::array(length_param));
        self
    }

    /// Check the signature can be announced to the host.
    pub fn validate(&self) -> Result<()> {
        if !self.returns.is_supported() {
            return Err(SessionError::Registration(format!(
                "unsupported return type {:?}",
                self.returns
            )));
        }
        for (index, shape) in self.params.iter().enumerate() {
            let ParameterShape::Array { length_param } = *shape else {
                continue;
            };
            let Some(length) = length_param else {
                return Err(SessionError::Registration(format!(
                    "array parameter {index} does not declare its length parameter"
                )));
            };
            if length >= index || self.params[length] != ParameterShape::Value {
                return Err(SessionError::Registration(format!(
                    "array parameter {index} takes its length from parameter {length}, \
                     which is not an earlier value parameter"
                )));
            }
        }
        Ok(())
    }
}

/// One decoded argument of a public call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Value(i32),
    String(String),
    Array(Vec<i32>),
}

/// Decoded arguments, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackArgs {
    args: Vec<Argument>,
}

impl CallbackArgs {
    pub fn new(args: Vec<Argument>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Argument> {
        self.args.get(index)
    }

    pub fn int(&self, index: usize) -> Option<i32> {
        match self.args.get(index)? {
            Argument::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// A value cell reinterpreted as a float.
    pub fn float(&self, index: usize) -> Option<f32> {
        self.int(index).map(|v| f32::from_bits(v as u32))
    }

    pub fn boolean(&self, index: usize) -> Option<bool> {
        self.int(index).map(|v| v != 0)
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        match self.args.get(index)? {
            Argument::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn array(&self, index: usize) -> Option<&[i32]> {
        match self.args.get(index)? {
            Argument::Array(cells) => Some(cells),
            _ => None,
        }
    }
}

/// Callback handler. Returns `None` for void callbacks.
pub type Handler = Rc<dyn Fn(&CallbackArgs) -> Option<Value>>;

/// A named callback with its signature and handler.
#[derive(Clone)]
pub struct CallbackDescriptor {
    name: String,
    signature: Signature,
    handler: Handler,
}

impl CallbackDescriptor {
    /// Build a descriptor, rejecting signatures the host cannot call.
    pub fn new<F>(name: impl Into<String>, signature: Signature, handler: F) -> Result<Self>
    where
        F: Fn(&CallbackArgs) -> Option<Value> + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(SessionError::Registration(
                "callback name must not be empty".to_string(),
            ));
        }
        if name.contains('\0') {
            return Err(SessionError::Registration(format!(
                "callback name {name:?} contains a NUL byte"
            )));
        }
        signature.validate()?;
        Ok(Self {
            name,
            signature,
            handler: Rc::new(handler),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// RegisterCall payload: name, parameter shapes, terminator.
    pub fn register_payload(&self) -> Result<BytesMut> {
        let capacity = self.name.len() + 2 + self.signature.params.len() * 5;
        let mut payload = BytesMut::with_capacity(capacity);
        put_string(&mut payload, &self.name)?;
        for shape in &self.signature.params {
            shape.encode(&mut payload);
        }
        payload.put_u8(ARG_TERMINATOR);
        Ok(payload)
    }

    /// Decode arguments starting at `offset` of a public call payload.
    pub fn decode_args(&self, payload: &[u8], offset: usize) -> Result<CallbackArgs> {
        let mut reader = PayloadReader::at(payload, offset);
        let mut args = Vec::with_capacity(self.signature.params.len());

        for shape in &self.signature.params {
            let arg = match *shape {
                ParameterShape::Value => Argument::Value(reader.read_i32()?),
                ParameterShape::String => Argument::String(reader.read_string()?),
                ParameterShape::Array { length_param } => {
                    let count = length_param
                        .and_then(|index| match args.get(index) {
                            Some(Argument::Value(count)) => Some(*count),
                            _ => None,
                        })
                        .ok_or_else(|| self.invalid("array length parameter was not decoded"))?;
                    let count = usize::try_from(count)
                        .map_err(|_| self.invalid(format!("negative array length {count}")))?;
                    if count > reader.remaining() / 4 {
                        return Err(self.invalid(format!(
                            "array of {count} cells exceeds the {} bytes left",
                            reader.remaining()
                        )));
                    }
                    let mut cells = Vec::with_capacity(count);
                    for _ in 0..count {
                        cells.push(reader.read_i32()?);
                    }
                    Argument::Array(cells)
                }
            };
            args.push(arg);
        }

        Ok(CallbackArgs::new(args))
    }

    /// Decode the arguments and call the handler.
    ///
    /// A void callback always yields `None`, whatever the handler returns.
    pub fn invoke(&self, payload: &[u8], offset: usize) -> Result<Option<Value>> {
        let args = self.decode_args(payload, offset)?;
        let result = (self.handler)(&args);
        if self.signature.returns == ReturnType::Void {
            return Ok(None);
        }
        Ok(result)
    }

    fn invalid(&self, reason: impl Into<String>) -> SessionError {
        SessionError::InvalidArguments {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for CallbackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Response payload for a public call: `{1, value}` or `{0}`.
pub fn encode_result(result: Option<Value>) -> Vec<u8> {
    match result {
        Some(value) => {
            let mut out = Vec::with_capacity(5);
            out.push(1);
            out.extend_from_slice(&value.to_bytes());
            out
        }
        None => vec![0],
    }
}

/// Name → descriptor table. One descriptor per name; the last registration wins.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, CallbackDescriptor>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor. Returns the one it replaced.
    pub fn insert(&mut self, descriptor: CallbackDescriptor) -> Option<CallbackDescriptor> {
        self.callbacks.insert(descriptor.name.clone(), descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&CallbackDescriptor> {
        self.callbacks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }
}
