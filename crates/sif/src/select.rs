//! Composable descriptor selectors.
//!
//! A [`Selector`] is a conjunction of predicates over used descriptors.
//! Constraints compose in any order; the empty selector matches every used
//! descriptor in the image.

use crate::{
    descriptor::Descriptor,
    format::{DataType, LinkTarget, PartType},
    Error, Result,
};

type Predicate = Box<dyn Fn(&Descriptor) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug)]
enum Invalid {
    ObjectId,
    GroupId,
}

/// A conjunctive filter over descriptors.
#[derive(Default)]
pub struct Selector {
    preds: Vec<Predicate>,
    invalid: Option<Invalid>,
}

impl Selector {
    /// Creates a selector matching every used descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to the descriptor with object ID `id`.
    pub fn with_id(mut self, id: u32) -> Self {
        if id == 0 {
            self.invalid = Some(Invalid::ObjectId);
            return self;
        }
        self.preds.push(Box::new(move |d| d.id() == id));
        self
    }

    /// Restricts to descriptors in group `group_id`.
    pub fn with_group_id(mut self, group_id: u32) -> Self {
        if group_id == 0 {
            self.invalid = Some(Invalid::GroupId);
            return self;
        }
        self.preds.push(Box::new(move |d| d.group_id() == group_id));
        self
    }

    /// Restricts to ungrouped descriptors.
    pub fn with_no_group(mut self) -> Self {
        self.preds.push(Box::new(|d| d.group_id() == 0));
        self
    }

    /// Restricts to descriptors of the given data type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.preds.push(Box::new(move |d| d.data_type() == data_type));
        self
    }

    /// Restricts to descriptors holding an object link to `id`.
    pub fn with_linked_id(mut self, id: u32) -> Self {
        if id == 0 {
            self.invalid = Some(Invalid::ObjectId);
            return self;
        }
        self.preds
            .push(Box::new(move |d| d.link() == Some(LinkTarget::Object(id))));
        self
    }

    /// Restricts to descriptors holding a group link to `group_id`.
    pub fn with_linked_group_id(mut self, group_id: u32) -> Self {
        if group_id == 0 {
            self.invalid = Some(Invalid::GroupId);
            return self;
        }
        self.preds
            .push(Box::new(move |d| d.link() == Some(LinkTarget::Group(group_id))));
        self
    }

    /// Restricts to partition descriptors of the given partition type.
    pub fn with_partition_type(mut self, part_type: PartType) -> Self {
        self.preds.push(Box::new(move |d| {
            matches!(d.partition_metadata(), Ok((_, p, _)) if p == part_type)
        }));
        self
    }

    /// Adds an arbitrary predicate.
    pub fn matching<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor) -> bool + Send + Sync + 'static,
    {
        self.preds.push(Box::new(f));
        self
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self.invalid {
            None => Ok(()),
            Some(Invalid::ObjectId) => Err(Error::InvalidObjectId),
            Some(Invalid::GroupId) => Err(Error::InvalidGroupId),
        }
    }

    pub(crate) fn matches(&self, d: &Descriptor) -> bool {
        self.preds.iter().all(|p| p(d))
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("constraints", &self.preds.len())
            .field("invalid", &self.invalid)
            .finish()
    }
}
