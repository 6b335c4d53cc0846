//! Distributed compressed-row sparse matrix.
//!
//! `CrsMatrix` follows a fill-then-freeze lifecycle:
//!
//! 1. Created empty over a row [`Map`]; entries are inserted or replaced per locally owned row,
//!    always addressed by *global* column index (duplicate inserts are summed).
//! 2. [`CrsMatrix::fill_complete`] freezes the structure against explicit domain and range
//!    maps: columns are renumbered into a [`ColumnMap`] (owned domain slice first, sorted
//!    ghosts after) and the halo [`Importer`] is built. This call is collective.
//! 3. After that the matrix is read-only except for value rescaling (`scale`, `left_scale`,
//!    `right_scale`, `replace_diag`, `set_all_to_scalar`), which must not run concurrently
//!    with `apply`. [`CrsMatrix::resume_fill`] reopens the structure.
//!
//! The owned rows are held as a faer [`SparseRowMat`] whose columns are the column map's
//! local indices. `apply` performs one halo exchange per call and then a row-parallel local
//! product; the transpose product scatters through faer and exports the ghost sums.

use std::collections::BTreeMap;
use std::sync::Arc;

use faer::sparse::linalg::matmul::sparse_dense_matmul;
use faer::sparse::{SparseRowMat, SparseRowMatRef, SymbolicSparseRowMat};
use faer::{Accum, MatMut, MatRef, Par};

use crate::core::traits::{Operator, TransMode};
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::parallel::{ColumnMap, Comm, Importer, Map, par_map_rows};

/// Read-only view of one filled row in local column indices.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub cols: &'a [usize],
    pub vals: &'a [f64],
}

#[derive(Debug, Clone)]
struct Filled {
    domain_map: Arc<Map>,
    range_map: Arc<Map>,
    col_map: Arc<ColumnMap>,
    importer: Arc<Importer>,
    local: SparseRowMat<usize, f64>,
}

impl Filled {
    fn row(&self, i: usize) -> RowView<'_> {
        RowView {
            cols: self.local.symbolic().col_idx_of_row_raw(i),
            vals: self.local.val_of_row(i),
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Active(Vec<BTreeMap<usize, f64>>),
    Filled(Box<Filled>),
}

#[derive(Debug, Clone)]
pub struct CrsMatrix {
    label: String,
    row_map: Arc<Map>,
    storage: Storage,
}

impl CrsMatrix {
    pub fn new(row_map: Arc<Map>) -> Self {
        let n = row_map.local_len();
        CrsMatrix {
            label: String::from("A"),
            row_map,
            storage: Storage::Active(vec![BTreeMap::new(); n]),
        }
    }

    /// Collective: build and freeze from per-row `(global column, value)` lists.
    pub fn from_global_rows(
        row_map: Arc<Map>,
        rows: Vec<Vec<(usize, f64)>>,
        domain_map: Arc<Map>,
        range_map: Arc<Map>,
    ) -> Result<Self, MgError> {
        if rows.len() != row_map.local_len() {
            return Err(MgError::dim(format!(
                "{} rows supplied for {} owned rows",
                rows.len(),
                row_map.local_len()
            )));
        }
        let active = rows
            .into_iter()
            .map(|r| {
                let mut m = BTreeMap::new();
                for (c, v) in r {
                    *m.entry(c).or_insert(0.0) += v;
                }
                m
            })
            .collect();
        let mut a = CrsMatrix {
            label: String::from("A"),
            row_map,
            storage: Storage::Active(active),
        };
        a.fill_complete(domain_map, range_map)?;
        Ok(a)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn label_str(&self) -> &str {
        &self.label
    }

    pub fn row_map(&self) -> &Arc<Map> {
        &self.row_map
    }

    pub fn comm(&self) -> &Arc<dyn Comm> {
        self.row_map.comm()
    }

    pub fn is_fill_complete(&self) -> bool {
        matches!(self.storage, Storage::Filled(_))
    }

    fn filled(&self) -> Result<&Filled, MgError> {
        match &self.storage {
            Storage::Filled(f) => Ok(f),
            Storage::Active(_) => Err(MgError::NotReady(format!(
                "{}: fill_complete has not been called",
                self.label
            ))),
        }
    }

    fn filled_mut(&mut self) -> Result<&mut Filled, MgError> {
        match &mut self.storage {
            Storage::Filled(f) => Ok(f),
            Storage::Active(_) => Err(MgError::NotReady(format!(
                "{}: fill_complete has not been called",
                self.label
            ))),
        }
    }

    fn active_mut(&mut self) -> Result<&mut Vec<BTreeMap<usize, f64>>, MgError> {
        match &mut self.storage {
            Storage::Active(rows) => Ok(rows),
            Storage::Filled(_) => Err(MgError::AlreadyFilled(format!(
                "{}: structure is frozen; call resume_fill first",
                self.label
            ))),
        }
    }

    fn check_row(&self, lrow: usize) -> Result<(), MgError> {
        let n = self.row_map.local_len();
        if lrow >= n {
            return Err(MgError::OutOfRange { index: lrow, bound: n });
        }
        Ok(())
    }

    /// Sum `vals` into owned row `lrow` at global columns `cols`.
    pub fn insert_local_values(&mut self, lrow: usize, cols: &[usize], vals: &[f64]) -> Result<(), MgError> {
        self.check_row(lrow)?;
        if cols.len() != vals.len() {
            return Err(MgError::dim("insert: cols and vals differ in length"));
        }
        let rows = self.active_mut()?;
        for (&c, &v) in cols.iter().zip(vals) {
            *rows[lrow].entry(c).or_insert(0.0) += v;
        }
        Ok(())
    }

    /// Same as [`Self::insert_local_values`] with the row addressed globally; it must be owned.
    pub fn insert_global_values(&mut self, grow: usize, cols: &[usize], vals: &[f64]) -> Result<(), MgError> {
        let lrow = self.row_map.global_to_local(grow).ok_or(MgError::OutOfRange {
            index: grow,
            bound: self.row_map.global_len(),
        })?;
        self.insert_local_values(lrow, cols, vals)
    }

    /// Overwrite existing entries of row `lrow`; every column must already be present.
    pub fn replace_local_values(&mut self, lrow: usize, cols: &[usize], vals: &[f64]) -> Result<(), MgError> {
        self.check_row(lrow)?;
        if cols.len() != vals.len() {
            return Err(MgError::dim("replace: cols and vals differ in length"));
        }
        let rows = self.active_mut()?;
        for (&c, &v) in cols.iter().zip(vals) {
            let bound = rows[lrow].len();
            match rows[lrow].get_mut(&c) {
                Some(slot) => *slot = v,
                None => return Err(MgError::OutOfRange { index: c, bound }),
            }
        }
        Ok(())
    }

    /// Collective: freeze the structure. The range map must partition rows like the row map.
    pub fn fill_complete(&mut self, domain_map: Arc<Map>, range_map: Arc<Map>) -> Result<(), MgError> {
        if !range_map.is_same_as(&self.row_map) {
            return Err(MgError::dim(format!(
                "{}: range map is not compatible with the row map",
                self.label
            )));
        }
        let label = self.label.clone();
        let rows = match &self.storage {
            Storage::Active(rows) => rows,
            Storage::Filled(_) => return Err(MgError::AlreadyFilled(format!("{label}: fill_complete called twice"))),
        };
        let ncols = domain_map.global_len();
        let owned = domain_map.local_range();
        let mut ghosts = Vec::new();
        for row in rows {
            for &c in row.keys() {
                if c >= ncols {
                    return Err(MgError::OutOfRange { index: c, bound: ncols });
                }
                if !owned.contains(&c) {
                    ghosts.push(c);
                }
            }
        }
        ghosts.sort_unstable();
        ghosts.dedup();
        let col_map = ColumnMap::new(owned, ghosts);

        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for row in rows {
            let mut local: Vec<(usize, f64)> = row
                .iter()
                .filter_map(|(&c, &v)| col_map.global_to_local(c).map(|l| (l, v)))
                .collect();
            local.sort_unstable_by_key(|&(l, _)| l);
            for (l, v) in local {
                col_idx.push(l);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        let symbolic = SymbolicSparseRowMat::new_checked(rows.len(), col_map.len(), row_ptr, None, col_idx);
        let local = SparseRowMat::new(symbolic, values);
        let importer = Importer::new(&domain_map, &col_map)?;
        self.storage = Storage::Filled(Box::new(Filled {
            domain_map,
            range_map,
            col_map: Arc::new(col_map),
            importer: Arc::new(importer),
            local,
        }));
        Ok(())
    }

    /// Collective: freeze with domain and range equal to the row map.
    pub fn fill_complete_square(&mut self) -> Result<(), MgError> {
        let m = Arc::clone(&self.row_map);
        self.fill_complete(Arc::clone(&m), m)
    }

    /// Reopen a frozen matrix for insertion. A no-op on an active matrix.
    pub fn resume_fill(&mut self) -> Result<(), MgError> {
        if let Storage::Filled(f) = &self.storage {
            let rows = (0..self.row_map.local_len())
                .map(|i| {
                    let r = f.row(i);
                    r.cols
                        .iter()
                        .zip(r.vals)
                        .map(|(&c, &v)| (f.col_map.local_to_global(c), v))
                        .collect()
                })
                .collect();
            self.storage = Storage::Active(rows);
        }
        Ok(())
    }

    pub fn col_map(&self) -> Result<&Arc<ColumnMap>, MgError> {
        Ok(&self.filled()?.col_map)
    }

    pub fn importer(&self) -> Result<&Arc<Importer>, MgError> {
        Ok(&self.filled()?.importer)
    }

    pub fn global_num_rows(&self) -> usize {
        self.row_map.global_len()
    }

    pub fn local_num_rows(&self) -> usize {
        self.row_map.local_len()
    }

    pub fn global_num_cols(&self) -> Result<usize, MgError> {
        Ok(self.filled()?.domain_map.global_len())
    }

    pub fn local_num_entries(&self) -> usize {
        match &self.storage {
            Storage::Active(rows) => rows.iter().map(|r| r.len()).sum(),
            Storage::Filled(f) => f.local.val().len(),
        }
    }

    /// Collective.
    pub fn global_num_entries(&self) -> usize {
        self.comm().all_reduce_sum_usize(self.local_num_entries())
    }

    pub fn num_entries_in_local_row(&self, lrow: usize) -> Result<usize, MgError> {
        self.check_row(lrow)?;
        Ok(match &self.storage {
            Storage::Active(rows) => rows[lrow].len(),
            Storage::Filled(f) => f.row(lrow).cols.len(),
        })
    }

    pub fn local_row_view(&self, lrow: usize) -> Result<RowView<'_>, MgError> {
        self.check_row(lrow)?;
        Ok(self.filled()?.row(lrow))
    }

    /// Row `lrow` as `(global columns, values)`, sorted by global column.
    pub fn global_row_copy(&self, lrow: usize) -> Result<(Vec<usize>, Vec<f64>), MgError> {
        self.check_row(lrow)?;
        let mut entries: Vec<(usize, f64)> = match &self.storage {
            Storage::Active(rows) => rows[lrow].iter().map(|(&c, &v)| (c, v)).collect(),
            Storage::Filled(f) => {
                let r = f.row(lrow);
                r.cols
                    .iter()
                    .zip(r.vals)
                    .map(|(&c, &v)| (f.col_map.local_to_global(c), v))
                    .collect()
            }
        };
        entries.sort_unstable_by_key(|&(c, _)| c);
        Ok(entries.into_iter().unzip())
    }

    /// Diagonal of the owned rows; structurally missing entries read as zero.
    pub fn local_diag_copy(&self) -> Result<Vec<f64>, MgError> {
        let f = self.filled()?;
        let start = self.row_map.min_global();
        Ok(par_map_rows(self.local_num_rows(), |i| {
            let Some(dc) = f.col_map.global_to_local(start + i) else {
                return 0.0;
            };
            let r = f.row(i);
            r.cols
                .iter()
                .position(|&c| c == dc)
                .map_or(0.0, |p| r.vals[p])
        }))
    }

    pub fn replace_diag(&mut self, diag: &[f64]) -> Result<(), MgError> {
        if diag.len() != self.local_num_rows() {
            return Err(MgError::dim("replace_diag: one value per owned row"));
        }
        let start = self.row_map.min_global();
        let f = self.filled_mut()?;
        let (symbolic, values) = f.local.parts_mut();
        for (i, &d) in diag.iter().enumerate() {
            let range = symbolic.row_range(i);
            let cols = symbolic.col_idx_of_row_raw(i);
            let slot = f
                .col_map
                .global_to_local(start + i)
                .and_then(|dc| cols.iter().position(|&c| c == dc));
            match slot {
                Some(p) => values[range.start + p] = d,
                None => return Err(MgError::OutOfRange { index: start + i, bound: cols.len() }),
            }
        }
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        match &mut self.storage {
            Storage::Active(rows) => rows.iter_mut().flat_map(|r| r.values_mut()).for_each(|v| *v *= alpha),
            Storage::Filled(f) => f.local.val_mut().iter_mut().for_each(|v| *v *= alpha),
        }
    }

    pub fn set_all_to_scalar(&mut self, alpha: f64) {
        match &mut self.storage {
            Storage::Active(rows) => rows.iter_mut().flat_map(|r| r.values_mut()).for_each(|v| *v = alpha),
            Storage::Filled(f) => f.local.val_mut().fill(alpha),
        }
    }

    /// Row scaling: A ← diag(d)·A.
    pub fn left_scale(&mut self, d: &[f64]) -> Result<(), MgError> {
        if d.len() != self.local_num_rows() {
            return Err(MgError::dim("left_scale: one value per owned row"));
        }
        let f = self.filled_mut()?;
        for (i, &s) in d.iter().enumerate() {
            f.local.val_of_row_mut(i).iter_mut().for_each(|v| *v *= s);
        }
        Ok(())
    }

    /// Collective column scaling: A ← A·diag(x), `x` on the domain map.
    pub fn right_scale(&mut self, x: &DistVector) -> Result<(), MgError> {
        let cols = self.import_columns(x)?;
        let f = self.filled_mut()?;
        let (symbolic, values) = f.local.parts_mut();
        for (v, &c) in values.iter_mut().zip(symbolic.col_idx()) {
            *v *= cols[c];
        }
        Ok(())
    }

    /// Collective.
    pub fn frobenius_norm(&self) -> f64 {
        let local: f64 = match &self.storage {
            Storage::Active(rows) => rows.iter().flat_map(|r| r.values()).map(|v| v * v).sum(),
            Storage::Filled(f) => f.local.val().iter().map(|v| v * v).sum(),
        };
        self.comm().all_reduce_sum(local).sqrt()
    }

    /// Collective: r ← b − A·x.
    pub fn residual(&self, x: &DistVector, b: &DistVector, r: &mut DistVector) -> Result<(), MgError> {
        r.copy_from(b);
        self.apply(x, r, TransMode::NoTrans, -1.0, 1.0)
    }

    /// Collective: owned entries of `x` followed by its ghost entries, in local column order.
    pub fn import_columns(&self, x: &DistVector) -> Result<Vec<f64>, MgError> {
        let f = self.filled()?;
        x.check_map(&f.domain_map, "import_columns")?;
        let mut col = Vec::with_capacity(f.col_map.len());
        col.extend_from_slice(x.local());
        col.extend(f.importer.import(x.local(), self.comm().as_ref()));
        Ok(col)
    }

    /// Owned rows of a filled matrix over local column indices (owned columns, then ghosts).
    pub fn local_block(&self) -> Result<SparseRowMatRef<'_, usize, f64>, MgError> {
        Ok(self.filled()?.local.as_ref())
    }

    /// One-line summary; local information only.
    pub fn describe(&self) -> String {
        match &self.storage {
            Storage::Active(_) => format!(
                "CrsMatrix \"{}\" [fill active] {} global rows, {} local entries",
                self.label,
                self.global_num_rows(),
                self.local_num_entries()
            ),
            Storage::Filled(f) => format!(
                "CrsMatrix \"{}\" {}x{} global, {} local rows, {} local entries, {} ghosts",
                self.label,
                self.global_num_rows(),
                f.domain_map.global_len(),
                self.local_num_rows(),
                f.local.val().len(),
                f.col_map.ghosts().len()
            ),
        }
    }
}

impl Operator for CrsMatrix {
    fn apply(
        &self,
        x: &DistVector,
        y: &mut DistVector,
        mode: TransMode,
        alpha: f64,
        beta: f64,
    ) -> Result<(), MgError> {
        let f = self.filled()?;
        match mode {
            TransMode::NoTrans => {
                y.check_map(&f.range_map, "apply")?;
                let col = self.import_columns(x)?;
                let ax = par_map_rows(self.local_num_rows(), |i| {
                    let r = f.row(i);
                    r.cols.iter().zip(r.vals).map(|(&c, &v)| v * col[c]).sum::<f64>()
                });
                combine(y.local_mut(), &ax, alpha, beta);
            }
            TransMode::Trans | TransMode::ConjTrans => {
                x.check_map(&f.range_map, "apply (transpose)")?;
                y.check_map(&f.domain_map, "apply (transpose)")?;
                let ncols = f.col_map.len();
                let mut z = vec![0.0; ncols];
                sparse_dense_matmul(
                    MatMut::from_column_major_slice_mut(&mut z, ncols, 1),
                    Accum::Replace,
                    f.local.transpose(),
                    MatRef::from_column_major_slice(x.local(), x.local().len(), 1),
                    1.0,
                    Par::Seq,
                );
                let n_owned = f.col_map.n_owned();
                let (owned, ghosts) = z.split_at_mut(n_owned);
                f.importer.export_add(ghosts, owned, self.comm().as_ref());
                combine(y.local_mut(), owned, alpha, beta);
            }
        }
        Ok(())
    }

    fn domain_map(&self) -> Result<&Arc<Map>, MgError> {
        Ok(&self.filled()?.domain_map)
    }

    fn range_map(&self) -> Result<&Arc<Map>, MgError> {
        Ok(&self.filled()?.range_map)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// y ← β·y + α·v, with β = 0 overwriting y regardless of its contents.
fn combine(y: &mut [f64], v: &[f64], alpha: f64, beta: f64) {
    if beta == 0.0 {
        for (yi, vi) in y.iter_mut().zip(v) {
            *yi = alpha * vi;
        }
    } else {
        for (yi, vi) in y.iter_mut().zip(v) {
            *yi = beta * *yi + alpha * vi;
        }
    }
}
