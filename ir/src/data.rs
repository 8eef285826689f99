//! Array descriptors.

use std::fmt;

use smallvec::SmallVec;

use crate::expr::Expr;

/// Element type of an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    #[default]
    Float64,
}

/// Where an array lives once lowered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StorageType {
    #[default]
    Default,
    CpuHeap,
    /// Per-thread storage, used for tile-private transients.
    CpuThreadLocal,
    Register,
}

/// How long a transient stays allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Allocated around the state that uses it.
    #[default]
    Scope,
    /// Allocated for the whole state machine of one program invocation.
    State,
    /// Persistent across invocations.
    Program,
}

/// Access mode of an [`AccessNode`](crate::node::AccessNode).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccessType {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl AccessType {
    pub fn reads(self) -> bool {
        matches!(self, AccessType::ReadOnly | AccessType::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessType::WriteOnly | AccessType::ReadWrite)
    }
}

/// A named buffer descriptor. Scalars have shape `[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    pub shape: SmallVec<[Expr; 4]>,
    pub dtype: DType,
    pub storage: StorageType,
    pub transient: bool,
    pub lifetime: Lifetime,
    /// Tile shape assigned by domain tiling.
    pub tile_size: Option<(i64, i64)>,
}

impl Array {
    pub fn new(shape: impl IntoIterator<Item = Expr>, dtype: DType) -> Self {
        Self {
            shape: shape.into_iter().collect(),
            dtype,
            storage: StorageType::Default,
            transient: false,
            lifetime: Lifetime::Scope,
            tile_size: None,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new([Expr::Int(1)], dtype)
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.len() == 1 && self.shape[0] == Expr::Int(1)
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")?;
        if self.transient {
            write!(f, " transient")?;
        }
        Ok(())
    }
}
