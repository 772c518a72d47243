//! Cursor over per-object leaf indexes.

use std::ops::Range;

use crate::core::constants::FORMULA_EVALUATION_BLOCK_SIZE;
use crate::core::error::Result;
use crate::dataset::ObjectsData;
use crate::model::oblivious_trees::ObliviousTrees;
use crate::prediction::evaluator::ModelEvaluator;

/// Walks a batch object by object and yields the leaf each object falls
/// into in every tree of a range.
///
/// Leaf indexes are computed lazily, one block of objects at a time.
///
/// ```text
/// let mut calcer = LeafIndexCalcerOnPool::new(&model, &objects, 0, None)?;
/// while calcer.can_get() {
///     let leaves = calcer.get();
///     calcer.next();
/// }
/// ```
#[derive(Debug)]
pub struct LeafIndexCalcerOnPool<'a> {
    evaluator: ModelEvaluator<'a>,
    objects: &'a ObjectsData,
    trees: Range<usize>,
    current_object: usize,
    block_start: usize,
    block_leaf_indexes: Vec<u32>,
}

impl<'a> LeafIndexCalcerOnPool<'a> {
    pub fn new(model: &'a ObliviousTrees, objects: &'a ObjectsData, begin: usize, end: Option<usize>) -> Result<Self> {
        Self::with_evaluator(ModelEvaluator::new(model)?, objects, begin, end)
    }

    pub fn with_evaluator(
        evaluator: ModelEvaluator<'a>,
        objects: &'a ObjectsData,
        begin: usize,
        end: Option<usize>,
    ) -> Result<Self> {
        let trees = evaluator.model().resolve_tree_range(begin, end)?;
        evaluator.check_objects(objects)?;
        let mut calcer = LeafIndexCalcerOnPool {
            evaluator,
            objects,
            trees,
            current_object: 0,
            block_start: 0,
            block_leaf_indexes: Vec::new(),
        };
        calcer.load_block(0);
        Ok(calcer)
    }

    fn block_end(&self) -> usize {
        (self.block_start + FORMULA_EVALUATION_BLOCK_SIZE).min(self.objects.object_count())
    }

    fn load_block(&mut self, block_start: usize) {
        self.block_start = block_start;
        let range = block_start..self.block_end();
        let tree_count = self.trees.len();
        let data = self.evaluator.quantize_source(self.objects, range.clone());
        self.block_leaf_indexes.clear();
        self.block_leaf_indexes.resize(range.len() * tree_count, 0);
        self.evaluator
            .calc_leaf_indexes_quantized(&data, self.trees.clone(), &mut self.block_leaf_indexes);
    }

    /// Advance to the next object. Returns whether it exists.
    pub fn next(&mut self) -> bool {
        if !self.can_get() {
            return false;
        }
        self.current_object += 1;
        if self.can_get() && self.current_object >= self.block_end() {
            self.load_block(self.current_object);
        }
        self.can_get()
    }

    pub fn can_get(&self) -> bool {
        self.current_object < self.objects.object_count()
    }

    /// Leaf indexes of the current object, one per tree in the range.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is exhausted.
    pub fn get(&self) -> Vec<u32> {
        assert!(self.can_get(), "Leaf index cursor is exhausted");
        let tree_count = self.trees.len();
        let offset = (self.current_object - self.block_start) * tree_count;
        self.block_leaf_indexes[offset..offset + tree_count].to_vec()
    }
}
