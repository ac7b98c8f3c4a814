mod memory;

use integration_tests::TestClient;
use tokio::task::JoinSet;

/// Fires `count` forward-auth checks for one caller at once and returns how many were admitted.
async fn concurrent_admissions(client: &TestClient, count: usize) -> usize {
    let mut requests = JoinSet::new();

    for _ in 0..count {
        let client = client.clone();
        requests.spawn(async move { client.forward_auth("/api/projects", "203.0.113.7", None).await.status() });
    }

    let mut admitted = 0;

    while let Some(status) = requests.join_next().await {
        if status.unwrap() == 200 {
            admitted += 1;
        }
    }

    admitted
}
