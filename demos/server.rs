//! A small multi-resource CoAP server: a `/time` resource that ticks a
//! background notification to its observers, plus a plain `/hello`
//! resource and the usual `.well-known/core` discovery answered for free
//! by the resource registry.

use std::time::{SystemTime, UNIX_EPOCH};

use coap_endpoint::config::Config;
use coap_endpoint::io_driver::PosixDriver;
use coap_endpoint::msg::code::resp;
use coap_endpoint::net::Transport;
use coap_endpoint::scheduler::Context;
use coap_endpoint::server::{Method, Resource};
use coap_endpoint::time::SystemClock;

fn main() {
  simple_logger::init().unwrap();

  let addr = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:5683".into());
  let sock = std::net::UdpSocket::bind(&addr).expect("bind");
  let mut ctx = Context::new(sock, SystemClock::new(), PosixDriver, Config::default(), Transport::Udp);

  let mut hello = Resource::new("hello").attribute("rt", "greeting");
  hello.on(Method::Get, |req| {
         let mut resp = req.ack(resp::CONTENT);
         resp.payload = b"hello, world".to_vec();
         resp
       });
  ctx.resources.add(hello);

  let mut time_res = Resource::new("time").observable().attribute("rt", "clock");
  time_res.on(Method::Get, |req| {
             let mut resp = req.ack(resp::CONTENT);
             resp.payload = now_string().into_bytes();
             resp
           });
  ctx.resources.add(time_res);

  log::info!("listening on {}", ctx.local_addr().unwrap());

  let mut last_tick = std::time::Instant::now();
  loop {
    ctx.process(1000);
    if last_tick.elapsed().as_secs() >= 1 {
      last_tick = std::time::Instant::now();
      let body = now_string();
      let _ = ctx.notify(&["time".to_string()], move |_seq| {
                   let mut m = coap_endpoint::msg::Message::new(coap_endpoint::msg::Type::Con, resp::CONTENT,
                                                                 coap_endpoint::msg::Id(0),
                                                                 coap_endpoint::msg::Token::EMPTY);
                   m.payload = body.clone().into_bytes();
                   m
                 });
    }
  }
}

fn now_string() -> String {
  let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
  secs.to_string()
}
