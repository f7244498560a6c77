//! BSD/Darwin attribute layout: `flags`, no `blksize` or `padding`.

use crate::abi::{Attr, SetXAttrIn};
use crate::wire;

pub(super) fn attr_to_wire(attr: &Attr, out: &mut wire::Attr) {
    out.flags = attr.flags;
}

pub(super) fn attr_from_wire(attr: &wire::Attr, out: &mut Attr) {
    out.flags = attr.flags;
}

pub(super) fn set_xattr_to_wire(input: &SetXAttrIn, out: &mut wire::SetXAttrRequest) {
    out.position = input.position;
    out.padding = input.padding;
}

pub(super) fn set_xattr_from_wire(req: &wire::SetXAttrRequest, out: &mut SetXAttrIn) {
    out.position = req.position;
    out.padding = req.padding;
}
