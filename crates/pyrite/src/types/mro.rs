//! C3 linearization.
//!
//! Kept free of the heap so it can be run speculatively: `__bases__` assignment computes the
//! new MRO of a class and all its subclasses against a scratch view before committing any.

use crate::{
    heap::HeapId,
    resource::{MAX_INHERITANCE_DEPTH, MAX_MRO_LENGTH},
};

/// Why a linearization could not be computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MroError {
    /// The class appears in its own ancestry.
    Cycle,
    /// The same base is listed twice.
    DuplicateBase(HeapId),
    /// No ordering satisfies local precedence and monotonicity for these bases.
    Inconsistent(Vec<HeapId>),
    /// A base's MRO is deeper than `MAX_INHERITANCE_DEPTH`.
    TooDeep,
    /// The merged MRO would exceed `MAX_MRO_LENGTH`.
    TooLong,
}

/// Computes the C3 linearization of a class with the given `bases`.
///
/// `mro_of` returns the current MRO of a base. The result starts with `self_id`.
///
/// The merge repeatedly takes the first head (in list order) that appears in no list's tail,
/// so among valid candidates the leftmost base's line wins.
pub(crate) fn compute_c3_mro(
    self_id: HeapId,
    bases: &[HeapId],
    mut mro_of: impl FnMut(HeapId) -> Vec<HeapId>,
) -> Result<Vec<HeapId>, MroError> {
    for (i, base) in bases.iter().enumerate() {
        if bases[..i].contains(base) {
            return Err(MroError::DuplicateBase(*base));
        }
    }

    let mut linearizations: Vec<Vec<HeapId>> = Vec::with_capacity(bases.len() + 1);
    for &base in bases {
        let lin = mro_of(base);
        if lin.contains(&self_id) {
            return Err(MroError::Cycle);
        }
        if lin.len() > MAX_INHERITANCE_DEPTH {
            return Err(MroError::TooDeep);
        }
        linearizations.push(lin);
    }
    linearizations.push(bases.to_vec());

    let mut result = vec![self_id];
    loop {
        linearizations.retain(|l| !l.is_empty());
        if linearizations.is_empty() {
            return Ok(result);
        }

        let next = linearizations
            .iter()
            .map(|lin| lin[0])
            .find(|candidate| !linearizations.iter().any(|other| other[1..].contains(candidate)));
        let Some(next) = next else {
            return Err(MroError::Inconsistent(bases.to_vec()));
        };

        result.push(next);
        for lin in &mut linearizations {
            if lin[0] == next {
                lin.remove(0);
            }
        }
        if result.len() > MAX_MRO_LENGTH {
            return Err(MroError::TooLong);
        }
    }
}
