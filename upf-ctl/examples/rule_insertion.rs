use std::time::Duration;

use futures::FutureExt;
use upf_ctl::{
    rules::{ACCESS, ACTION_FORWARD, CORE, DST_ACCESS, DST_CORE},
    with_session, ClientError, ClientOptions, Far, Pdr, Qer, DEFAULT_PERCENTILES,
};
use upf_sim::{Engine, SimServer};

const UE_POOL: u32 = 0x1000_0000;
const N3_ADDR: u32 = 0xc0a8_0101;
const ENB_ADDR: u32 = 0xc0a8_0102;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt::init();

    // Serve a simulated engine on a local port
    let engine = Engine::new();
    let server = SimServer::spawn(engine.clone()).await.expect("failed to bind engine");

    let options = ClientOptions::default().timeout(Duration::from_secs(1));

    // Every rule installed in the session is removed when the closure returns
    let installed = with_session(server.local_addr(), options, |session| {
        async move {
            for ue in 1..=16u32 {
                let teid = 0x3000_0000 + ue;

                session
                    .add_pdr(Pdr {
                        src_iface: ACCESS,
                        tunnel_ip4_dst: N3_ADDR,
                        tunnel_teid: teid,
                        src_ip: UE_POOL + ue,
                        src_iface_mask: 0xff,
                        tunnel_ip4_dst_mask: u32::MAX,
                        tunnel_teid_mask: u32::MAX,
                        src_ip_mask: u32::MAX,
                        precedence: 255,
                        pdr_id: 1,
                        fse_id: ue,
                        far_id: 1,
                        qer_ids: vec![1],
                        need_decap: true,
                        ..Default::default()
                    })
                    .await?;

                session
                    .add_pdr(Pdr {
                        src_iface: CORE,
                        dst_ip: UE_POOL + ue,
                        src_iface_mask: 0xff,
                        dst_ip_mask: u32::MAX,
                        precedence: 255,
                        pdr_id: 2,
                        fse_id: ue,
                        far_id: 2,
                        qer_ids: vec![1],
                        ..Default::default()
                    })
                    .await?;

                session
                    .add_far(Far {
                        far_id: 1,
                        fse_id: ue,
                        apply_action: ACTION_FORWARD,
                        dst_intf: DST_CORE,
                        ..Default::default()
                    })
                    .await?;

                session
                    .add_far(Far {
                        far_id: 2,
                        fse_id: ue,
                        apply_action: ACTION_FORWARD,
                        dst_intf: DST_ACCESS,
                        tunnel_type: 1,
                        tunnel_ip4_src: N3_ADDR,
                        tunnel_ip4_dst: ENB_ADDR,
                        tunnel_teid: teid,
                        tunnel_port: 2152,
                        ..Default::default()
                    })
                    .await?;

                session
                    .add_session_qer(Qer {
                        qer_id: 1,
                        fse_id: ue,
                        ul_mbr: 50_000,
                        dl_mbr: 100_000,
                        ..Default::default()
                    })
                    .await?;
            }

            let stats = session.client().stats().session_stats(&DEFAULT_PERCENTILES).await?;
            println!("pre-QoS packets: {:?}", stats.pre_qos.get("packets"));

            Ok::<_, ClientError>(session.rules().len())
        }
        .boxed()
    })
    .await?;

    println!("Installed {installed} rules, {} left in the engine", engine.pdr_count());

    Ok(())
}
