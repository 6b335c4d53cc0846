use std::sync::Arc;

use mulgrid::config::ParameterList;
use mulgrid::context::{KspContext, SolverKind, UserData, create_preconditioner};
use mulgrid::core::DistVector;
use mulgrid::matrix::gallery;
use mulgrid::parallel::{Comm, ThreadComm};

fn main() {
    #[cfg(feature = "rayon")]
    mulgrid::parallel::init_thread_pool();

    let n = 10_000;
    let ranks = 4;
    // each rank builds its share of the operator and solves collectively
    let reports = ThreadComm::run(ranks, |comm| {
        let rank = comm.rank();
        let a = Arc::new(gallery::laplace_1d(n, comm).unwrap());
        let params = ParameterList::new()
            .with("coarse: max size", 100)
            .with("smoother: type", "symmetric gauss-seidel");
        let pc = create_preconditioner(Arc::clone(&a), &params, UserData::default()).unwrap();
        let summary = pc.hierarchy().describe();

        let h = 1.0 / (n + 1) as f64;
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |_| h * h);
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        let mut ksp = KspContext::new(SolverKind::Pcg, a, 1e-10, 100).with_pc(pc);
        let stats = ksp.solve(&b, &mut x).unwrap();
        (rank, summary, stats)
    });

    for (rank, summary, stats) in reports {
        if rank == 0 {
            print!("{summary}");
            println!(
                "PCG: converged = {}, iterations = {}, final residual = {:.3e}",
                stats.converged, stats.iterations, stats.final_residual
            );
        }
    }
}
