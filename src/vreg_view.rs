// This module describes how a vector register is split into lanes for the transpose networks:
// an element size in bytes and a lane count. Networks walk from a view to its doubled view
// (twice the element size, half the lanes) as they combine 2x2 blocks into larger ones.

//! Lane views of SIMD registers.

/// `num_elems` lanes of `elem_size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VregView {
    elem_size: usize,
    num_elems: usize,
}

impl VregView {
    /// Panics unless the element size is 1, 2, 4 or 8 bytes, the lane count is a power of
    /// two, and the view fits a 128-bit register.
    pub const fn new(elem_size: usize, num_elems: usize) -> Self {
        assert!(
            elem_size == 1 || elem_size == 2 || elem_size == 4 || elem_size == 8,
            "element size must be 1, 2, 4 or 8 bytes"
        );
        assert!(num_elems.is_power_of_two(), "lane count must be a power of two");
        assert!(elem_size * num_elems <= 16, "view wider than 128 bits");
        Self {
            elem_size,
            num_elems,
        }
    }

    pub const fn elem_size(self) -> usize {
        self.elem_size
    }

    pub const fn num_elems(self) -> usize {
        self.num_elems
    }

    /// Total bytes covered by the view.
    pub const fn bytes(self) -> usize {
        self.elem_size * self.num_elems
    }

    /// The same bytes seen as lanes twice as wide.
    pub const fn doubled(self) -> Self {
        Self::new(self.elem_size * 2, self.num_elems / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_keeps_width() {
        let v = VregView::new(1, 16);
        assert_eq!(v.bytes(), 16);
        assert_eq!(v.doubled(), VregView::new(2, 8));
        assert_eq!(v.doubled().doubled().doubled(), VregView::new(8, 2));
        assert_eq!(VregView::new(4, 2).doubled(), VregView::new(8, 1));
    }

    #[test]
    #[should_panic(expected = "element size")]
    fn test_rejects_odd_element_size() {
        VregView::new(3, 4);
    }
}
