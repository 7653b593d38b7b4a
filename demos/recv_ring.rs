//! Ring exchange through the eager receive primitive.
//!
//! Each process sends to the next rank and receives from the previous one
//! with `recv` in an eager context, reading the status back afterwards.
//!
//! Run with: cargo build --features native --example recv_ring &&
//! mpiexec -n 4 ./target/debug/examples/recv_ring

use mpiprim::mpi::{Mpi, StatusBuffer};
use mpiprim::{recv, Array, ArrayDesc, Context, Dtype, RecvParams, Result, Tracer, Value};

fn main() -> Result<()> {
    let mpi = Mpi::init()?;
    let native = mpi.messenger();
    let world = mpi.world();

    let rank = native.rank(world)?;
    let size = native.size(world)?;

    if size < 2 {
        if rank == 0 {
            eprintln!("This example requires at least 2 processes");
        }
        return Ok(());
    }

    let next = (rank + 1) % size;
    let prev = (rank + size - 1) % size;

    let send_data = Array::from_slice(&[2], &[rank as f64 * 100.0 + 1.0, rank as f64 * 100.0 + 2.0])?;
    let template = Array::zeros(ArrayDesc::new(&[2], Dtype::F64))?;
    let status = StatusBuffer::new()?;
    let params = RecvParams::new(world)
        .source(prev)
        .tag(0)
        .status(status.handle());

    let mut ctx = Context::eager(&native);

    // Even ranks send first, odd ranks receive first.
    let received = if rank % 2 == 0 {
        native.send(world, next, 0, &send_data)?;
        recv(&mut ctx, template.into(), params)?
    } else {
        let received = recv(&mut ctx, template.into(), params)?;
        native.send(world, next, 0, &send_data)?;
        received
    };

    let Tracer::Plain(Value::Concrete(received)) = received else {
        unreachable!("eager receive returns a concrete array");
    };
    let values = received.to_vec::<f64>()?;
    let meta = status.read(&native, Dtype::F64)?;
    println!(
        "Rank {rank}: received {values:?} from rank {} (tag={}, count={})",
        meta.source, meta.tag, meta.count
    );

    assert_eq!(values, vec![prev as f64 * 100.0 + 1.0, prev as f64 * 100.0 + 2.0]);
    assert_eq!(meta.source, prev);

    if rank == 0 {
        println!("\nRing receive test passed!");
    }
    Ok(())
}
