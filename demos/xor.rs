use ndarray::arr2;
use nnet::mlp::Network;
use nnet::option::TrainingOption;

fn main() -> nnet::Result<()> {
    tracing_subscriber::fmt::init();

    let input = arr2(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
    let target = arr2(&[[0.0], [1.0], [1.0], [0.0]]);

    let mut network = Network::new(&[2, 10, 10, 1]);
    let option = TrainingOption::default()
        .learning_rate(0.1)
        .epochs(40_000)
        .monitoring(false);
    network.train(input.view(), target.view(), &option)?;

    println!("final objective: {:.6}", network.supervised_objective(input.view(), target.view()));
    for (x, t) in input.outer_iter().zip(target.outer_iter()) {
        let y = network.forward(x);
        println!("{} xor {} = {:.4} (expected {})", x[0], x[1], y[0], t[0]);
    }
    Ok(())
}
