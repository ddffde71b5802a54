use std::ops::Range;

/// A mutable window over one section of a state buffer.
///
/// Fields are addressed with the absolute offsets of a layout, the section
/// translates them by its own base offset.
#[derive(Debug)]
pub struct Section<'a> {
    data: &'a mut [f64],
    base: usize,
}

impl<'a> Section<'a> {
    fn new(data: &'a mut [f64], base: usize) -> Self {
        Self { data, base }
    }

    fn local(&self, range: &Range<usize>) -> Range<usize> {
        range.start - self.base..range.end - self.base
    }

    /// Gives a read-only view of a vector field.
    pub fn get(&self, range: &Range<usize>) -> &[f64] {
        &self.data[self.local(range)]
    }

    /// Gives a mutable view of a vector field.
    pub fn get_mut(&mut self, range: &Range<usize>) -> &mut [f64] {
        let local = self.local(range);
        &mut self.data[local]
    }

    pub fn scalar(&self, index: usize) -> f64 {
        self.data[index - self.base]
    }

    pub fn set(&mut self, index: usize, value: f64) {
        self.data[index - self.base] = value;
    }

    pub fn add(&mut self, index: usize, value: f64) {
        self.data[index - self.base] += value;
    }

    /// Zeroes every slot of this section.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Returns the raw slots of this section.
    pub fn as_slice(&self) -> &[f64] {
        &*self.data
    }
}

/// A typed overlay over a state buffer: the task state and the algo state as
/// two disjoint sections that can be borrowed at the same time.
///
/// A view never outlives the borrow of its buffer, so it cannot survive a
/// reallocation or reassignment of that buffer.
#[derive(Debug)]
pub struct StateView<'a> {
    pub task: Section<'a>,
    pub algo: Section<'a>,
}

impl<'a> StateView<'a> {
    /// Splits `buffer` at `algo_start`.
    ///
    /// # Arguments
    /// * `buffer` - The whole state buffer.
    /// * `algo_start` - Index of the first intra-iteration slot.
    pub fn new(buffer: &'a mut [f64], algo_start: usize) -> Self {
        let (task, algo) = buffer.split_at_mut(algo_start);

        Self {
            task: Section::new(task, 0),
            algo: Section::new(algo, algo_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_translate_absolute_offsets() {
        let mut buffer = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut view = StateView::new(&mut buffer, 2);

        assert_eq!(view.task.get(&(0..2)), [0.0, 1.0]);
        assert_eq!(view.algo.get(&(3..5)), [3.0, 4.0]);

        view.algo.add(5, 10.0);
        view.algo.get_mut(&(2..3))[0] = view.task.scalar(1);

        assert_eq!(buffer, [0.0, 1.0, 1.0, 3.0, 4.0, 15.0]);
    }
}
