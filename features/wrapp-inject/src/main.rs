use std::sync::Arc;

use wrapp_config::ConfigStore;
use wrapp_inject::{
    ArgumentError, AsyncResource, ContainerBuilder, DynError, Failure, InjectableDeclaration,
};

#[derive(Debug)]
struct Pool {
    url: String,
}

#[derive(Debug)]
struct Transaction {
    pool: Arc<Pool>,
}

fn main() {
    let config: ConfigStore = [("db.host", "localhost"), ("db.name", "wrapp")]
        .into_iter()
        .collect();

    let app = ContainerBuilder::new()
        .with_config(config)
        .register(
            InjectableDeclaration::singleton::<Pool>()
                .expression("postgres://${db.host}/${db.name}")
                .constructor(|args| {
                    Ok::<_, ArgumentError>(Pool {
                        url: args.text(0)?.to_string(),
                    })
                }),
        )
        .register(
            InjectableDeclaration::scoped::<Transaction>()
                .depends_on::<Pool>()
                .async_generator(|args| async move {
                    let transaction = Transaction {
                        pool: args.service(0)?,
                    };
                    Ok::<_, ArgumentError>(AsyncResource::new(
                        transaction,
                        |failure: Option<Failure>| async move {
                            match failure {
                                Some(failure) => println!("rollback: {failure}"),
                                None => println!("commit"),
                            }
                            Ok::<_, DynError>(())
                        },
                    ))
                }),
        )
        .build()
        .unwrap();

    println!("{:?}", app);

    futures::executor::block_on(async {
        let result = app
            .with_scope_async(|scope| async move {
                let transaction = scope.get_async::<Transaction>().await?;
                println!("{:?}", transaction.pool.url);
                Ok::<_, DynError>(())
            })
            .await;
        println!("{:?}", result);
        app.close_async().await.unwrap();
    });
}
