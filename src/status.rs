use std::collections::BTreeSet;

/// Pseudo status recorded for "no status at all".
pub const NO_STATUS: u16 = 0;

/// Status codes accepted in addition to the 2xx range.
///
/// The set only ever grows: [`allow`](Self::allow) takes the union with the
/// current codes and [`allow_any`](Self::allow_any) switches to accepting
/// every code, [`NO_STATUS`] included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowedStatusCodes {
    codes: BTreeSet<u16>,
    any: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusVerdict {
    Accept,
    Reject,
}

impl StatusVerdict {
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl AllowedStatusCodes {
    pub fn allow(&self, codes: impl IntoIterator<Item = u16>) -> Self {
        let mut next = self.clone();
        next.codes.extend(codes);
        next
    }

    pub fn allow_any(&self) -> Self {
        let mut next = self.allow([NO_STATUS]);
        next.any = true;
        next
    }

    pub fn contains(&self, status: u16) -> bool {
        self.any || self.codes.contains(&status)
    }

    pub fn is_any(&self) -> bool {
        self.any
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.codes.iter().copied()
    }
}

pub fn is_conventional_success(status: u16) -> bool {
    (200..300).contains(&status)
}

pub fn validate(status: u16, allowed: &AllowedStatusCodes) -> StatusVerdict {
    if allowed.contains(status) || is_conventional_success(status) {
        StatusVerdict::Accept
    } else {
        StatusVerdict::Reject
    }
}
