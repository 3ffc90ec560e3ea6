mod common;

use bytes::Bytes;
use common::{fast_options, repl_id, TestCluster, TIMEOUT};
use coordkv::{
    EnqueueEntryError, EnqueueEntryInput, KvCommand, ProposalError, RaftMembershipChange, RaftOptions, ReadIndexError,
    ReplicaId, Role, StateMachineOutput,
};
use std::error::Error;
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn replicates_and_survives_follower_restart() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    let leader = cluster.wait_for_leader(&all).await;
    let follower = all.iter().find(|id| **id != leader).unwrap().to_string();
    let remaining: Vec<&str> = all.iter().copied().filter(|id| *id != follower).collect();

    for i in 0..10 {
        if i == 4 {
            cluster.stop_node(&follower).await;
        }
        if i == 7 {
            cluster.start_node(&follower).await;
        }
        let among = if (4..7).contains(&i) { &remaining } else { &all };
        cluster.put(among, &format!("key-{}", i), &format!("value-{}", i)).await;
    }

    let commit = cluster.wait_for_convergence(&all).await;
    let expected = cluster.node(&leader).reader.pairs();
    assert_eq!(expected.len(), 10);
    for id in &all {
        let status = cluster.node(id).client.replicated_log.status().await?;
        assert_eq!(status.hard_state.commit.as_u64(), commit);
        assert_eq!(status.applied.as_u64(), commit);
        assert_eq!(cluster.node(id).reader.pairs(), expected, "State differs on {}", id);
    }
    for i in 0..10 {
        assert_eq!(expected.get(&format!("key-{}", i)), Some(&Bytes::from(format!("value-{}", i))));
    }

    Ok(())
}

#[tokio::test]
async fn redirects_to_the_leader() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    let leader = cluster.wait_for_leader(&all).await;
    let follower = all.iter().find(|id| **id != leader).unwrap();

    let result = cluster
        .node(follower)
        .client
        .replicated_log
        .enqueue_entry(EnqueueEntryInput { data: Bytes::new() })
        .await;
    match result {
        Err(EnqueueEntryError::LeaderRedirect(info)) => {
            assert_eq!(info.replica_id, leader);
            assert_eq!(info.member_info.map(|m| m.replica_id), Some(leader.clone()));
        }
        other => panic!("Expected a redirect, got {:?}", other),
    }

    // Empty entries still resolve once applied.
    let pending = cluster
        .node(&leader)
        .client
        .replicated_log
        .enqueue_entry(EnqueueEntryInput { data: Bytes::new() })
        .await?;
    assert!(pending.entry_id().index() > 0);
    assert_eq!(pending.wait().await?, StateMachineOutput::NoData);

    Ok(())
}

#[tokio::test]
async fn isolated_leader_loses_its_writes() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    cluster.put(&all, "before", "1").await;
    let old_leader = cluster.wait_for_leader(&all).await;
    let majority: Vec<&str> = all.iter().copied().filter(|id| *id != old_leader).collect();

    cluster.network.isolate(&old_leader);
    let lost = KvCommand::Put {
        key: "lost".to_string(),
        value: Bytes::from_static(b"x"),
    }
    .encode();
    let lost_write = {
        let replicated_log = cluster.node(&old_leader).client.replicated_log.clone();
        tokio::spawn(async move { replicated_log.propose(lost).await })
    };

    let new_leader = cluster.wait_for_leader(&majority).await;
    assert_ne!(new_leader, old_leader);
    cluster.put(&majority, "after", "2").await;

    cluster.network.heal();
    cluster.wait_for_value(&old_leader, "after", "2").await;
    cluster.wait_for_value(&old_leader, "before", "1").await;

    let result = tokio::time::timeout(TIMEOUT, lost_write).await??;
    assert!(result.is_err(), "Write on a partitioned leader must not succeed: {:?}", result);
    for id in &all {
        assert_eq!(cluster.node(id).reader.get("lost"), None);
    }

    Ok(())
}

#[tokio::test]
async fn deposed_leader_fails_pending_proposals() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    cluster.put(&all, "before", "1").await;
    let old_leader = cluster.wait_for_leader(&all).await;

    cluster.network.isolate(&old_leader);
    let data = KvCommand::Put {
        key: "stranded".to_string(),
        value: Bytes::from_static(b"x"),
    }
    .encode();
    let pending = cluster
        .node(&old_leader)
        .client
        .replicated_log
        .enqueue_entry(EnqueueEntryInput { data })
        .await?;

    // Resolved by stepping down, while the partition still stands.
    let result = tokio::time::timeout(TIMEOUT, pending.wait()).await?;
    assert_eq!(result, Err(ProposalError::OutcomeUnknown));
    let status = cluster.node(&old_leader).client.replicated_log.status().await?;
    assert_ne!(status.soft_state.role, Role::Leader);

    cluster.network.heal();
    cluster.put(&all, "after", "2").await;
    for id in &all {
        cluster.wait_for_value(id, "after", "2").await;
        assert_eq!(cluster.node(id).reader.get("stranded"), None);
    }

    Ok(())
}

#[tokio::test]
async fn five_members_survive_leader_crash() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(5).await;
    let ids: Vec<String> = (0..5).map(repl_id).collect();
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    cluster.put(&all, "k1", "v1").await;
    let leader = cluster.wait_for_leader(&all).await;
    cluster.stop_node(&leader).await;
    let survivors: Vec<&str> = all.iter().copied().filter(|id| *id != leader).collect();

    let new_leader = cluster.wait_for_leader(&survivors).await;
    assert_ne!(new_leader, leader);
    cluster.put(&survivors, "k2", "v2").await;

    for id in &survivors {
        cluster.wait_for_value(id, "k1", "v1").await;
        cluster.wait_for_value(id, "k2", "v2").await;
    }

    Ok(())
}

#[tokio::test]
async fn lagging_follower_catches_up_from_snapshot() -> Result<(), Box<dyn Error>> {
    let options = RaftOptions {
        snapshot_threshold: Some(5),
        snapshot_catchup_entries: Some(0),
        ..fast_options()
    };
    let cluster = TestCluster::start_with_options(3, options).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    let leader = cluster.wait_for_leader(&all).await;
    let lagging = all.iter().find(|id| **id != leader).unwrap().to_string();
    let others: Vec<&str> = all.iter().copied().filter(|id| *id != lagging).collect();

    cluster.network.isolate(&lagging);
    for i in 0..30 {
        cluster.put(&others, &format!("key-{}", i), &format!("value-{}", i)).await;
    }

    cluster.network.heal();
    for i in 0..30 {
        cluster
            .wait_for_value(&lagging, &format!("key-{}", i), &format!("value-{}", i))
            .await;
    }

    let snapshots = std::fs::read_dir(cluster.data_dir(&lagging).join("snap"))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "snap"))
        .count();
    assert!(snapshots > 0, "Lagging follower should hold an installed snapshot");

    Ok(())
}

#[tokio::test]
async fn read_index_observes_completed_writes() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    let leader = cluster.wait_for_leader(&all).await;
    for i in 0..5 {
        cluster.put(&all, "counter", &i.to_string()).await;

        for id in &all {
            let token = cluster.node(id).client.replicated_log.read_index().await?;
            assert!(token.index() > 0);
            assert_eq!(
                cluster.node(id).reader.get("counter"),
                Some(Bytes::from(i.to_string())),
                "Stale read on {} (leader {})",
                id,
                leader
            );
        }
    }

    Ok(())
}

#[tokio::test]
async fn membership_changes_add_and_remove_members() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    cluster.put(&all, "k1", "v1").await;

    let new_member = cluster.start_joining_node("replica-new").await;
    let leader = cluster.wait_for_leader(&all).await;
    let pending = cluster
        .node(&leader)
        .client
        .replicated_log
        .propose_conf_change(vec![RaftMembershipChange::AddVoter(new_member)])
        .await?;
    assert_eq!(pending.wait().await?, StateMachineOutput::NoData);
    cluster.wait_for_value("replica-new", "k1", "v1").await;

    let status = cluster.node(&leader).client.replicated_log.status().await?;
    assert!(status.config_state.is_voter(&ReplicaId::new("replica-new")));

    // Remove a follower, then keep writing with the new member in the quorum.
    let removed = all.iter().find(|id| **id != leader).unwrap().to_string();
    let pending = cluster
        .node(&leader)
        .client
        .replicated_log
        .propose_conf_change(vec![RaftMembershipChange::Remove(removed.clone())])
        .await?;
    pending.wait().await?;
    cluster.stop_node(&removed).await;

    let mut remaining: Vec<&str> = all.iter().copied().filter(|id| *id != removed).collect();
    remaining.push("replica-new");
    cluster.put(&remaining, "k2", "v2").await;
    for id in &remaining {
        cluster.wait_for_value(id, "k2", "v2").await;
    }

    let leader = cluster.wait_for_leader(&remaining).await;
    let status = cluster.node(&leader).client.replicated_log.status().await?;
    assert!(!status.config_state.is_member(&ReplicaId::new(removed)));
    assert_eq!(status.config_state.members().len(), 3);

    Ok(())
}

#[tokio::test]
async fn joint_consensus_adds_two_voters_at_once() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    cluster.put(&all, "k1", "v1").await;

    let fourth = cluster.start_joining_node("replica-4").await;
    let fifth = cluster.start_joining_node("replica-5").await;
    let leader = cluster.wait_for_leader(&all).await;
    let pending = cluster
        .node(&leader)
        .client
        .replicated_log
        .propose_conf_change(vec![
            RaftMembershipChange::AddVoter(fourth),
            RaftMembershipChange::AddVoter(fifth),
        ])
        .await?;
    assert_eq!(pending.wait().await?, StateMachineOutput::NoData);

    // The leader leaves the joint config without being asked.
    let mut everyone = all.clone();
    everyone.extend_from_slice(&["replica-4", "replica-5"]);
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let leader = cluster.wait_for_leader(&all).await;
        let config_state = cluster.node(&leader).client.replicated_log.status().await?.config_state;
        if !config_state.is_joint() && config_state.voters.len() == 5 {
            break;
        }
        assert!(Instant::now() < deadline, "Joint config never left: {:?}", config_state);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cluster.put(&everyone, "k2", "v2").await;
    for id in &everyone {
        cluster.wait_for_value(id, "k1", "v1").await;
        cluster.wait_for_value(id, "k2", "v2").await;
        let config_state = cluster.node(id).client.replicated_log.status().await?.config_state;
        assert_eq!(config_state.voters.len(), 5, "Config on {}: {:?}", id, config_state);
    }

    Ok(())
}

#[tokio::test]
async fn healthy_cluster_logs_no_errors() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3).await;
    let ids = [repl_id(0), repl_id(1), repl_id(2)];
    let all: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    for i in 0..10 {
        cluster.put(&all, &format!("key-{}", i), "value").await;
    }
    cluster.wait_for_convergence(&all).await;
    for id in &all {
        cluster.node(id).client.replicated_log.read_index().await?;
    }

    assert_eq!(cluster.errors_logged(), 0);

    Ok(())
}

#[tokio::test]
async fn shutdown_fails_pending_work() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(1).await;
    let id = repl_id(0);

    cluster.put(&[id.as_str()], "k", "v").await;
    let replicated_log = cluster.node(&id).client.replicated_log.clone();
    cluster.stop_node(&id).await;

    let result = tokio::time::timeout(Duration::from_secs(5), replicated_log.propose(Bytes::new())).await?;
    assert!(result.is_err());
    let result = tokio::time::timeout(Duration::from_secs(5), replicated_log.read_index()).await?;
    assert_eq!(result.unwrap_err(), ReadIndexError::ReplicaExited);

    Ok(())
}
