//! Linux attribute layout: `blksize` and `padding`, no `flags`.

use crate::abi::{Attr, SetXAttrIn};
use crate::wire;

pub(super) fn attr_to_wire(attr: &Attr, out: &mut wire::Attr) {
    out.blksize = attr.blksize;
    out.padding = attr.padding;
}

pub(super) fn attr_from_wire(attr: &wire::Attr, out: &mut Attr) {
    out.blksize = attr.blksize;
    out.padding = attr.padding;
}

pub(super) fn set_xattr_to_wire(_input: &SetXAttrIn, _out: &mut wire::SetXAttrRequest) {}

pub(super) fn set_xattr_from_wire(_req: &wire::SetXAttrRequest, _out: &mut SetXAttrIn) {}
