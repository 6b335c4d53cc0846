//! Halo-exchange plan for a filled matrix.
//!
//! Built once from a domain [`Map`] and the ghost list of a [`ColumnMap`]. `import` fills
//! the ghost slots of a column vector with the owners' values (matvec), `export_add` sends
//! ghost contributions back to their owners and sums them (transpose matvec).

use super::map::{ColumnMap, Map};
use crate::error::MgError;

#[derive(Debug, Clone)]
pub struct Importer {
    /// For each peer rank: positions in the ghost array that rank fills.
    recv_from: Vec<Vec<usize>>,
    /// For each peer rank: local domain indices this rank sends to it.
    send_to: Vec<Vec<usize>>,
    n_ghosts: usize,
}

impl Importer {
    /// Collective.
    pub fn new(domain: &Map, cols: &ColumnMap) -> Result<Self, MgError> {
        let comm = domain.comm();
        let p = comm.size();
        let mut recv_from = vec![Vec::new(); p];
        let mut requests = vec![Vec::new(); p];
        for (pos, &gid) in cols.ghosts().iter().enumerate() {
            let owner = domain.owner_of(gid)?;
            recv_from[owner].push(pos);
            requests[owner].push(gid);
        }
        let asked = comm.all_to_all_usize(requests);
        let send_to = asked
            .into_iter()
            .map(|gids| {
                gids.into_iter()
                    .map(|g| {
                        domain
                            .global_to_local(g)
                            .ok_or(MgError::OutOfRange { index: g, bound: domain.global_len() })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Importer { recv_from, send_to, n_ghosts: cols.ghosts().len() })
    }

    pub fn n_ghosts(&self) -> usize {
        self.n_ghosts
    }

    /// Collective: ghost values for the locally owned slice `owned`.
    pub fn import(&self, owned: &[f64], comm: &dyn super::Comm) -> Vec<f64> {
        let send = self
            .send_to
            .iter()
            .map(|idx| idx.iter().map(|&i| owned[i]).collect())
            .collect();
        let recv = comm.all_to_all_f64(send);
        let mut ghosts = vec![0.0; self.n_ghosts];
        for (positions, vals) in self.recv_from.iter().zip(recv) {
            for (&pos, v) in positions.iter().zip(vals) {
                ghosts[pos] = v;
            }
        }
        ghosts
    }

    /// Collective: add ghost contributions into their owners' slots of `owned`.
    pub fn export_add(&self, ghosts: &[f64], owned: &mut [f64], comm: &dyn super::Comm) {
        let send = self
            .recv_from
            .iter()
            .map(|positions| positions.iter().map(|&pos| ghosts[pos]).collect())
            .collect();
        let recv = comm.all_to_all_f64(send);
        for (idx, vals) in self.send_to.iter().zip(recv) {
            for (&i, v) in idx.iter().zip(vals) {
                owned[i] += v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadComm;

    #[test]
    fn import_and_export_round_trip_neighbors() {
        let out = ThreadComm::run(2, |comm| {
            let map = Map::uniform(4, comm.clone());
            // each rank needs its neighbor's boundary entry
            let ghost = if comm.rank() == 0 { 2 } else { 1 };
            let cols = ColumnMap::new(map.local_range(), vec![ghost]);
            let imp = Importer::new(&map, &cols).unwrap();
            let owned: Vec<f64> = map.local_range().map(|g| g as f64 * 10.0).collect();
            let ghosts = imp.import(&owned, comm.as_ref());
            let mut acc = vec![0.0; map.local_len()];
            imp.export_add(&[1.0], &mut acc, comm.as_ref());
            (ghosts, acc)
        });
        assert_eq!(out[0].0, vec![20.0]);
        assert_eq!(out[1].0, vec![10.0]);
        assert_eq!(out[0].1, vec![0.0, 1.0]);
        assert_eq!(out[1].1, vec![1.0, 0.0]);
    }
}
