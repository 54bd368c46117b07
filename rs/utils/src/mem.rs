pub fn align_to_next_boundary(current_position: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    (current_position + mask) & !mask
}

/// Round `value` up to a multiple of `multiple` (not necessarily a power of two).
pub fn round_up_to_multiple(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}
