use std::sync::Once;

use flexi_logger::Logger;

static INIT: Once = Once::new();

#[allow(unused)]
pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("hustbox=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}
