use crate::error::{Error, Result};

/// Rearranges the items in the slice such that all items for which the predicate is true come
/// before all elements for which the predicate is false. Returns the index of the first item for
/// which the predicate is false.
pub fn partition<T>(slice: &mut [T], predicate: impl Fn(&T) -> bool) -> usize {
    let mut cursor = 0;
    for i in 0..slice.len() {
        if predicate(&slice[i]) {
            slice.swap(i, cursor);
            cursor += 1;
        }
    }

    cursor
}

/// Rearranges the items in the slice such that, in the new configuration, all items before
/// the nth item are less than the nth item, and all items after the nth item are greater than or
/// equal to the nth item. The item in the nth position will be the nth smallest item in the
/// slice.
pub fn nth_element<T>(slice: &mut [T], nth: usize, less_than: &impl Fn(&T, &T) -> bool) {
    if slice.len() < 2 {
        return;
    }

    let slice_len = slice.len();
    let pivot = slice_len / 2;
    slice.swap(pivot, slice_len - 1);

    // Partition the slice so that all items before i are less than slice[i], and all items
    // after i are greater than or equal to slice[i];
    let final_pivot_index = {
        let (pivot_val, work) = match slice.split_last_mut() {
            Some(split) => split,
            None => return
        };
        partition(work, |x| less_than(x, pivot_val))
    };
    slice.swap(slice_len - 1, final_pivot_index);

    // Choose which side of the slice to recurse into. (If the pivot position is nth, then done!)
    if nth < final_pivot_index {
        nth_element(&mut slice[0..final_pivot_index], nth, less_than);
    }
    else if nth > final_pivot_index {
        nth_element(&mut slice[(final_pivot_index + 1)..slice_len], nth - final_pivot_index - 1,
                less_than);
    }
}

/// A fixed-capacity writer over caller-owned storage. It never grows: pushing past the end of
/// the backing slice is reported instead of reallocating or writing out of bounds.
pub struct VectorAdaptor<'a, T> {
    what: &'static str,
    storage: &'a mut [T],
    len: usize
}

impl<'a, T> VectorAdaptor<'a, T> {
    pub fn new(what: &'static str, storage: &'a mut [T]) -> VectorAdaptor<'a, T> {
        VectorAdaptor {
            what: what,
            storage: storage,
            len: 0
        }
    }

    pub fn push(&mut self, value: T) -> Result<usize> {
        if self.len >= self.storage.len() {
            return Err(Error::CapacityExceeded {what: self.what, capacity: self.storage.len()});
        }
        self.storage[self.len] = value;
        self.len += 1;
        Ok(self.len - 1)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.storage[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    #[test]
    fn partition_moves_matches_to_front() {
        let mut v = [5, 1, 4, 2, 3];
        let mid = partition(&mut v, |x| *x < 3);
        assert_eq!(mid, 2);
        assert!(v[..mid].iter().all(|x| *x < 3));
        assert!(v[mid..].iter().all(|x| *x >= 3));
    }

    #[test]
    fn nth_element_places_nth_smallest() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut v: Vec<u32> = (0..33).map(|_| rng.gen_range(0..20)).collect();
            let mut sorted = v.clone();
            sorted.sort();
            let nth = rng.gen_range(0..v.len());
            nth_element(&mut v, nth, &|a: &u32, b: &u32| a < b);
            assert_eq!(v[nth], sorted[nth]);
            assert!(v[..nth].iter().all(|x| *x <= v[nth]));
            assert!(v[nth..].iter().all(|x| *x >= v[nth]));
        }
    }

    #[test]
    fn adaptor_rejects_overflow() {
        let mut storage = [0u32; 2];
        let mut adaptor = VectorAdaptor::new("test", &mut storage);
        adaptor.push(1).unwrap();
        adaptor.push(2).unwrap();
        assert!(adaptor.push(3).is_err());
        assert_eq!(adaptor.as_slice(), &[1, 2]);
    }
}
